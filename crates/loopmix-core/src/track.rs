//! Track metadata
//!
//! Each kind of source carries only the fields relevant to it. Scheduling and
//! sync match on [`TrackKind`] instead of probing optional properties.

use serde::{Deserialize, Serialize};

/// Source kind with its kind-specific metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackKind {
    /// Fixed-length loop clip
    Loop {
        bpm: f64,
        /// Authored bar count, if the clip declares one
        #[serde(default)]
        bars: Option<u32>,
    },
    FullSong {
        #[serde(default)]
        bpm: Option<f64>,
    },
    /// Live stream; never loopable or syncable
    RadioStation { station: String },
    VideoClip {
        #[serde(default)]
        bpm: Option<f64>,
        frame_rate: f32,
    },
}

impl TrackKind {
    /// Nominal BPM, if known and positive
    pub fn bpm(&self) -> Option<f64> {
        let bpm = match self {
            TrackKind::Loop { bpm, .. } => Some(*bpm),
            TrackKind::FullSong { bpm } | TrackKind::VideoClip { bpm, .. } => *bpm,
            TrackKind::RadioStation { .. } => None,
        };
        bpm.filter(|b| b.is_finite() && *b > 0.0)
    }

    /// Whether loop scheduling may run on this kind at all
    pub fn is_loopable(&self) -> bool {
        !matches!(self, TrackKind::RadioStation { .. })
    }

    /// Bar count declared by the source
    pub fn authored_bars(&self) -> Option<u32> {
        match self {
            TrackKind::Loop { bars, .. } => bars.filter(|b| *b > 0),
            _ => None,
        }
    }

    /// Replace the nominal BPM (ignored for radio)
    pub fn set_bpm(&mut self, new_bpm: f64) {
        match self {
            TrackKind::Loop { bpm, .. } => *bpm = new_bpm,
            TrackKind::FullSong { bpm } | TrackKind::VideoClip { bpm, .. } => *bpm = Some(new_bpm),
            TrackKind::RadioStation { .. } => {}
        }
    }
}

/// A track as presented to a deck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    #[serde(flatten)]
    pub kind: TrackKind,
}

impl Track {
    pub fn new(title: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            title: title.into(),
            kind,
        }
    }

    /// Convenience constructor for a loop clip
    pub fn looped(title: impl Into<String>, bpm: f64, bars: Option<u32>) -> Self {
        Self::new(title, TrackKind::Loop { bpm, bars })
    }

    #[inline]
    pub fn bpm(&self) -> Option<f64> {
        self.kind.bpm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_by_kind() {
        assert_eq!(Track::looped("a", 128.0, Some(8)).bpm(), Some(128.0));
        assert_eq!(Track::new("s", TrackKind::FullSong { bpm: None }).bpm(), None);
        let radio = TrackKind::RadioStation {
            station: "kexp".into(),
        };
        assert_eq!(radio.bpm(), None);
        assert!(!radio.is_loopable());
    }

    #[test]
    fn test_invalid_bpm_is_unknown() {
        assert_eq!(TrackKind::Loop { bpm: 0.0, bars: None }.bpm(), None);
        assert_eq!(TrackKind::Loop { bpm: f64::NAN, bars: None }.bpm(), None);
    }

    #[test]
    fn test_set_bpm_fills_optional() {
        let mut kind = TrackKind::VideoClip {
            bpm: None,
            frame_rate: 30.0,
        };
        kind.set_bpm(100.0);
        assert_eq!(kind.bpm(), Some(100.0));
    }

    #[test]
    fn test_yaml_tagging() {
        let track: Track =
            serde_yaml::from_str("title: Drums\nkind: loop\nbpm: 174.0\nbars: 8\n").unwrap();
        assert_eq!(track.kind, TrackKind::Loop { bpm: 174.0, bars: Some(8) });
        assert_eq!(track.kind.authored_bars(), Some(8));
    }
}
