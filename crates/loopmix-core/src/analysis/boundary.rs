//! Content boundary detection
//!
//! Loop clips are often exported with a fixed length but shorter or offset
//! content. The detector walks the first channel in short RMS windows and
//! reports the first and last window above the silence threshold.
//!
//! Confidence reflects how sharp the silence/sound transitions are. For each
//! boundary the quiet-side window RMS is compared with the loud-side one,
//! `1 - quiet / loud`, and the two scores are averaged. A boundary at the
//! buffer edge has no quiet side and scores 1.

use serde::{Deserialize, Serialize};

use super::db_to_linear;
use crate::audio_file::PcmBuffer;

/// Detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Windows at or below this level count as silence (dBFS)
    pub silence_threshold_db: f32,
    /// RMS window length
    pub window_ms: f32,
    /// Content windows below this level count as sparse (dBFS)
    pub sparse_threshold_db: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -60.0,
            window_ms: 10.0,
            sparse_threshold_db: -40.0,
        }
    }
}

/// Detected audible region, in samples of the analysed buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentBoundaries {
    /// First sample of the first audible window
    pub start_sample: usize,
    /// One past the last sample of the last audible window
    pub end_sample: usize,
    pub sample_rate: u32,
    /// Transition sharpness in [0, 1]; 0 when nothing was audible
    pub confidence: f32,
}

impl ContentBoundaries {
    pub fn start_seconds(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate as f64
    }

    pub fn end_seconds(&self) -> f64 {
        self.end_sample as f64 / self.sample_rate as f64
    }

    pub fn duration_seconds(&self) -> f64 {
        self.end_sample.saturating_sub(self.start_sample) as f64 / self.sample_rate as f64
    }
}

/// Everything the resolver needs to know about a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ContentAnalysis {
    /// `None` when the buffer could not be analysed at all
    pub boundaries: Option<ContentBoundaries>,
    /// Fraction of content windows below the sparse threshold
    pub sparse_fraction: f32,
    pub file_duration_seconds: f64,
}

impl ContentAnalysis {
    /// Analysis result for a buffer that could not be examined
    pub fn failed(file_duration_seconds: f64) -> Self {
        Self {
            boundaries: None,
            sparse_fraction: 0.0,
            file_duration_seconds,
        }
    }
}

/// Windowed-RMS boundary detector
#[derive(Debug, Clone, Default)]
pub struct BoundaryDetector {
    config: AnalysisConfig,
}

impl BoundaryDetector {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Detect content boundaries; `None` for an empty buffer
    pub fn detect(&self, pcm: &PcmBuffer) -> Option<ContentBoundaries> {
        self.analyze(pcm).boundaries
    }

    /// Detect boundaries and measure sparseness in one pass over the windows
    pub fn analyze(&self, pcm: &PcmBuffer) -> ContentAnalysis {
        let file_duration = pcm.duration_seconds();
        let samples = pcm.first_channel();
        if samples.is_empty() || pcm.sample_rate == 0 {
            return ContentAnalysis::failed(file_duration);
        }

        let window = self.window_len(pcm.sample_rate);
        let rms: Vec<f32> = samples.chunks(window).map(window_rms).collect();
        let silence = db_to_linear(self.config.silence_threshold_db);

        let first = rms.iter().position(|&r| r > silence);
        let last = rms.iter().rposition(|&r| r > silence);

        let (first, last) = match (first, last) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                log::debug!("No window above {} dBFS", self.config.silence_threshold_db);
                return ContentAnalysis {
                    boundaries: Some(ContentBoundaries {
                        start_sample: 0,
                        end_sample: samples.len(),
                        sample_rate: pcm.sample_rate,
                        confidence: 0.0,
                    }),
                    sparse_fraction: 1.0,
                    file_duration_seconds: file_duration,
                };
            }
        };

        let start_score = if first == 0 {
            1.0
        } else {
            sharpness(rms[first - 1], rms[first])
        };
        let end_score = if last + 1 >= rms.len() {
            1.0
        } else {
            sharpness(rms[last + 1], rms[last])
        };

        let sparse = db_to_linear(self.config.sparse_threshold_db);
        let content = &rms[first..=last];
        let sparse_windows = content.iter().filter(|&&r| r < sparse).count();

        let boundaries = ContentBoundaries {
            start_sample: first * window,
            end_sample: ((last + 1) * window).min(samples.len()),
            sample_rate: pcm.sample_rate,
            confidence: ((start_score + end_score) * 0.5).clamp(0.0, 1.0),
        };

        log::debug!(
            "Content {:.3}s..{:.3}s of {:.3}s (confidence {:.2})",
            boundaries.start_seconds(),
            boundaries.end_seconds(),
            file_duration,
            boundaries.confidence
        );

        ContentAnalysis {
            boundaries: Some(boundaries),
            sparse_fraction: sparse_windows as f32 / content.len() as f32,
            file_duration_seconds: file_duration,
        }
    }

    fn window_len(&self, sample_rate: u32) -> usize {
        ((self.config.window_ms.max(0.1) / 1000.0) * sample_rate as f32).round().max(1.0) as usize
    }
}

fn window_rms(window: &[f32]) -> f32 {
    let sum: f32 = window.iter().map(|s| s * s).sum();
    (sum / window.len() as f32).sqrt()
}

/// `1 - quiet / loud`, clamped to [0, 1]
fn sharpness(quiet: f32, loud: f32) -> f32 {
    if loud <= 0.0 {
        return 0.0;
    }
    (1.0 - quiet / loud).clamp(0.0, 1.0)
}
