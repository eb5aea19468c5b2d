//! Background track loader
//!
//! Decoding and content analysis run on a dedicated "track-loader" thread so
//! neither the control path nor the audio callback ever waits on file I/O.
//! Requests are processed in order; results come back on a channel the host
//! polls (`try_recv`) or blocks on (`recv_timeout`).
//!
//! Loading a new track into a deck cancels a load still in flight for that
//! deck. A cancelled load reports [`DecodeError::Cancelled`] and the deck is
//! left as it was.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::analysis::{AnalysisConfig, BoundaryDetector, ContentAnalysis};
use crate::audio_file::{decode_bytes, decode_file, DecodeError, PcmBuffer};
use crate::track::Track;
use crate::types::{DeckId, NUM_DECKS};

/// Where the audio for a load comes from
#[derive(Debug)]
pub enum TrackSource {
    File(PathBuf),
    /// An encoded file already in memory, with an optional extension hint
    Bytes {
        data: Vec<u8>,
        extension: Option<String>,
    },
    /// Already-decoded PCM; only analysis runs
    Pcm(PcmBuffer),
}

impl TrackSource {
    fn describe(&self) -> String {
        match self {
            TrackSource::File(path) => path.display().to_string(),
            TrackSource::Bytes { data, .. } => format!("{} bytes", data.len()),
            TrackSource::Pcm(pcm) => format!("{} PCM frames", pcm.len()),
        }
    }
}

/// A decoded and analyzed track, ready to install on a deck
#[derive(Debug)]
pub struct PreparedTrack {
    pub track: Track,
    pub pcm: PcmBuffer,
    pub analysis: ContentAnalysis,
}

impl PreparedTrack {
    /// Run content analysis on already-decoded PCM
    pub fn prepare(track: Track, pcm: PcmBuffer, detector: &BoundaryDetector) -> Self {
        let analysis = detector.analyze(&pcm);
        Self {
            track,
            pcm,
            analysis,
        }
    }
}

/// Outcome of one load request
#[derive(Debug)]
pub struct LoadResult {
    pub deck: DeckId,
    pub result: Result<PreparedTrack, DecodeError>,
}

/// Cancellation handle for a queued or running load
#[derive(Debug, Clone)]
pub struct LoadTicket {
    deck: DeckId,
    cancel: Arc<AtomicBool>,
}

impl LoadTicket {
    pub fn deck(&self) -> DeckId {
        self.deck
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

struct LoadRequest {
    deck: DeckId,
    track: Track,
    source: TrackSource,
    cancel: Arc<AtomicBool>,
}

/// Owner of the loader thread
pub struct TrackLoader {
    request_tx: Option<Sender<LoadRequest>>,
    result_rx: Receiver<LoadResult>,
    in_flight: [Option<LoadTicket>; NUM_DECKS],
    handle: Option<JoinHandle<()>>,
}

impl TrackLoader {
    /// Spawn the loader thread
    pub fn spawn(analysis: AnalysisConfig) -> std::io::Result<Self> {
        let (request_tx, request_rx) = channel::unbounded::<LoadRequest>();
        let (result_tx, result_rx) = channel::unbounded::<LoadResult>();

        let handle = thread::Builder::new()
            .name("track-loader".to_string())
            .spawn(move || loader_thread(request_rx, result_tx, BoundaryDetector::new(analysis)))?;

        Ok(Self {
            request_tx: Some(request_tx),
            result_rx,
            in_flight: [None, None],
            handle: Some(handle),
        })
    }

    /// Queue a load for `deck`, cancelling any earlier one for the same deck
    pub fn load(&mut self, deck: DeckId, track: Track, source: TrackSource) -> LoadTicket {
        if let Some(previous) = self.in_flight[deck.index()].take() {
            if !previous.is_cancelled() {
                log::debug!("Deck {}: superseding previous load", deck);
                previous.cancel();
            }
        }

        let ticket = LoadTicket {
            deck,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        let request = LoadRequest {
            deck,
            track,
            source,
            cancel: Arc::clone(&ticket.cancel),
        };

        match &self.request_tx {
            Some(tx) if tx.send(request).is_ok() => {
                self.in_flight[deck.index()] = Some(ticket.clone());
            }
            _ => {
                log::error!("Deck {}: loader thread is gone, load dropped", deck);
                ticket.cancel();
            }
        }
        ticket
    }

    /// Cancel whatever is loading into `deck`
    pub fn cancel(&mut self, deck: DeckId) {
        if let Some(ticket) = self.in_flight[deck.index()].take() {
            ticket.cancel();
        }
    }

    pub fn try_recv(&self) -> Option<LoadResult> {
        self.result_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next result
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LoadResult> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for TrackLoader {
    fn drop(&mut self) {
        for ticket in self.in_flight.iter_mut().filter_map(Option::take) {
            ticket.cancel();
        }
        // Closing the request channel ends the thread loop
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Track loader thread panicked");
            }
        }
    }
}

fn loader_thread(rx: Receiver<LoadRequest>, tx: Sender<LoadResult>, detector: BoundaryDetector) {
    log::info!("Track loader thread started");

    while let Ok(request) = rx.recv() {
        let deck = request.deck;
        let result = handle_load(request, &detector);
        if tx.send(LoadResult { deck, result }).is_err() {
            break;
        }
    }

    log::info!("Track loader thread exiting");
}

fn handle_load(request: LoadRequest, detector: &BoundaryDetector) -> Result<PreparedTrack, DecodeError> {
    let LoadRequest {
        deck,
        track,
        source,
        cancel,
    } = request;

    if cancel.load(Ordering::Relaxed) {
        return Err(DecodeError::Cancelled);
    }

    let start = Instant::now();
    let described = source.describe();
    let pcm = match source {
        TrackSource::File(path) => decode_file(&path, &cancel),
        TrackSource::Bytes { data, extension } => decode_bytes(data, extension.as_deref(), &cancel),
        TrackSource::Pcm(pcm) => Ok(pcm),
    };

    let pcm = match pcm {
        Ok(pcm) => pcm,
        Err(e) => {
            log::warn!("Deck {}: failed to load {}: {}", deck, described, e);
            return Err(e);
        }
    };

    if cancel.load(Ordering::Relaxed) {
        return Err(DecodeError::Cancelled);
    }

    let prepared = PreparedTrack::prepare(track, pcm, detector);
    log::info!(
        "Deck {}: loaded '{}' ({:.2}s at {}Hz) in {:?}",
        deck,
        prepared.track.title,
        prepared.pcm.duration_seconds(),
        prepared.pcm.sample_rate,
        start.elapsed()
    );
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const WAIT: Duration = Duration::from_secs(10);

    fn write_wav(path: &Path, sample_rate: u32, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * seconds) as usize;
        for i in 0..frames {
            let value = ((i as f32 * 0.03).sin() * 16000.0) as i16;
            writer.write_sample(value).unwrap();
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_file_decodes_and_analyzes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_wav(&path, 44100, 2.0);

        let mut loader = TrackLoader::spawn(AnalysisConfig::default()).unwrap();
        loader.load(
            DeckId::A,
            Track::looped("Test Loop", 120.0, Some(1)),
            TrackSource::File(path),
        );

        let result = loader.recv_timeout(WAIT).expect("no load result");
        assert_eq!(result.deck, DeckId::A);
        let prepared = result.result.unwrap();
        assert_eq!(prepared.pcm.sample_rate, 44100);
        assert_eq!(prepared.pcm.len(), 88200);
        let boundaries = prepared.analysis.boundaries.unwrap();
        assert!(boundaries.confidence > 0.9);
        assert!((prepared.analysis.file_duration_seconds - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_corrupt_bytes_fail_fast() {
        let mut loader = TrackLoader::spawn(AnalysisConfig::default()).unwrap();
        loader.load(
            DeckId::B,
            Track::looped("Broken", 100.0, None),
            TrackSource::Bytes {
                data: vec![0x42; 4096],
                extension: None,
            },
        );

        let result = loader.recv_timeout(WAIT).expect("no load result");
        assert_eq!(result.deck, DeckId::B);
        assert!(result.result.is_err());
    }

    #[test]
    fn test_pcm_source_only_analyzes() {
        let mut loader = TrackLoader::spawn(AnalysisConfig::default()).unwrap();
        let pcm = PcmBuffer::mono(48000, vec![0.0; 48000]);
        loader.load(DeckId::A, Track::looped("Silence", 120.0, None), TrackSource::Pcm(pcm));

        let prepared = loader.recv_timeout(WAIT).unwrap().result.unwrap();
        let boundaries = prepared.analysis.boundaries.unwrap();
        assert_eq!(boundaries.confidence, 0.0);
    }

    #[test]
    fn test_new_load_supersedes_previous() {
        let mut loader = TrackLoader::spawn(AnalysisConfig::default()).unwrap();
        let first = loader.load(
            DeckId::A,
            Track::looped("First", 120.0, None),
            TrackSource::Pcm(PcmBuffer::mono(48000, vec![0.5; 4800])),
        );
        let second = loader.load(
            DeckId::A,
            Track::looped("Second", 120.0, None),
            TrackSource::Pcm(PcmBuffer::mono(48000, vec![0.5; 4800])),
        );
        let other_deck = loader.load(
            DeckId::B,
            Track::looped("Other", 120.0, None),
            TrackSource::Pcm(PcmBuffer::mono(48000, vec![0.5; 4800])),
        );

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!other_deck.is_cancelled());

        // Every request still reports back
        let mut seen = 0;
        while loader.recv_timeout(WAIT).is_some() {
            seen += 1;
            if seen == 3 {
                break;
            }
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_explicit_cancel() {
        let mut loader = TrackLoader::spawn(AnalysisConfig::default()).unwrap();
        let ticket = loader.load(
            DeckId::B,
            Track::looped("Cancel me", 90.0, None),
            TrackSource::Pcm(PcmBuffer::mono(48000, vec![0.1; 480])),
        );
        loader.cancel(DeckId::B);
        assert!(ticket.is_cancelled());
        assert_eq!(ticket.deck(), DeckId::B);
    }
}
