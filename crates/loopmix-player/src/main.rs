//! Loopmix Player - headless two-deck loop mixing from the command line
//!
//! Loads one clip per deck, starts deck A, brings deck B in on the beat,
//! syncs B to A's tempo and crossfades from A to B.
//!
//! ## Usage
//!
//! ```text
//! loopmix-player <deck-a-file>:<bpm> <deck-b-file>:<bpm> [options]
//!
//!   --bars <n>        loop length in bars (default from config)
//!   --fade <seconds>  crossfade duration (default 16)
//!   --config <path>   config file (default ~/.config/loopmix/loopmix.yaml)
//! ```
//!
//! Set `RUST_LOG=debug` for scheduler and sync detail.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use loopmix_core::audio::start_audio_system;
use loopmix_core::config::{default_config_path, load_config, EngineConfig};
use loopmix_core::controller::{Console, ControlThread};
use loopmix_core::loader::{TrackLoader, TrackSource};
use loopmix_core::track::Track;
use loopmix_core::DeckId;

/// Loader wait per track
const LOAD_TIMEOUT: Duration = Duration::from_secs(60);

struct DeckArg {
    path: PathBuf,
    bpm: f64,
}

struct Args {
    decks: [DeckArg; 2],
    bars: Option<u32>,
    fade_seconds: f64,
    config_path: PathBuf,
}

fn parse_deck(arg: &str) -> Result<DeckArg> {
    let (path, bpm) = arg
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected <file>:<bpm>, got '{}'", arg))?;
    let bpm: f64 = bpm
        .parse()
        .with_context(|| format!("invalid BPM in '{}'", arg))?;
    Ok(DeckArg {
        path: PathBuf::from(path),
        bpm,
    })
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut bars = None;
    let mut fade_seconds: f64 = 16.0;
    let mut config_path = default_config_path();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bars" => {
                let value = args.next().context("--bars needs a value")?;
                bars = Some(value.parse().context("invalid --bars")?);
            }
            "--fade" => {
                let value = args.next().context("--fade needs a value")?;
                fade_seconds = value.parse().context("invalid --fade")?;
            }
            "--config" => {
                config_path = PathBuf::from(args.next().context("--config needs a value")?);
            }
            _ => positional.push(arg),
        }
    }

    if fade_seconds.is_nan() || fade_seconds < 0.0 {
        bail!("--fade must be a non-negative number of seconds");
    }

    let [a, b]: [String; 2] = positional.try_into().map_err(|_| {
        anyhow!("usage: loopmix-player <deck-a-file>:<bpm> <deck-b-file>:<bpm> [--bars N] [--fade S] [--config PATH]")
    })?;

    Ok(Args {
        decks: [parse_deck(&a)?, parse_deck(&b)?],
        bars,
        fade_seconds,
        config_path,
    })
}

fn log_status(console: &Console) {
    for deck in DeckId::ALL {
        let status = console.status(deck);
        log::info!(
            "Deck {}: {:?} {:6.2}s  {:6.2} BPM x{:.4}  peak {:.2}  restarts {} (late {})",
            deck,
            status.state,
            status.position_seconds,
            status.bpm.unwrap_or(0.0),
            status.playback_rate,
            status.peak,
            status.restarts_executed,
            status.late_restarts
        );
    }
}

/// Run `f` with the console locked
fn with_console<T>(console: &Mutex<Console>, f: impl FnOnce(&mut Console) -> Result<T>) -> Result<T> {
    let mut console = console
        .lock()
        .map_err(|_| anyhow!("console lock poisoned"))?;
    f(&mut console)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    log::info!("loopmix-player starting up");

    let config: EngineConfig = load_config(&args.config_path);

    let audio = start_audio_system(&config.audio).context("Failed to start audio output")?;
    log::info!(
        "Audio running at {}Hz, {} frames (~{:.1}ms)",
        audio.sample_rate,
        audio.buffer_size,
        audio.latency_ms
    );

    let mut loader = TrackLoader::spawn(config.analysis.clone()).context("Failed to start track loader")?;
    for (deck, arg) in DeckId::ALL.into_iter().zip(&args.decks) {
        let title = arg
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| deck.name().to_string());
        loader.load(
            deck,
            Track::looped(title, arg.bpm, args.bars),
            TrackSource::File(arg.path.clone()),
        );
    }

    let mut console = Console::new(audio.context.clone(), audio.link, &config);
    console.set_listener(|event| log::info!("{:?}", event));

    for _ in 0..DeckId::ALL.len() {
        let loaded = loader
            .recv_timeout(LOAD_TIMEOUT)
            .ok_or_else(|| anyhow!("Timed out waiting for the track loader"))?;
        let deck = loaded.deck;
        let prepared = loaded
            .result
            .with_context(|| format!("Failed to load deck {}", deck))?;
        console.install(deck, prepared)?;
        if let Some(boundaries) = console.deck(deck).loop_boundaries() {
            log::info!(
                "Deck {}: loop {:.4}s via {} (confidence {:.2})",
                deck,
                boundaries.actual_loop_duration_seconds,
                boundaries.strategy,
                boundaries.confidence
            );
        }
    }
    drop(loader);

    let console = Arc::new(Mutex::new(console));
    let _control = ControlThread::spawn(Arc::clone(&console), config.scheduler.tick_interval())
        .context("Failed to start control thread")?;

    with_console(&console, |c| {
        c.set_crossfade(0.0);
        c.play(DeckId::A)?;
        Ok(())
    })?;
    thread::sleep(Duration::from_secs(4));

    with_console(&console, |c| {
        c.play(DeckId::B)?;
        c.enable_sync(DeckId::A, DeckId::B)?;
        Ok(())
    })?;

    let steps = (args.fade_seconds * 10.0).round() as u32;
    for step in 0..=steps {
        let position = if steps == 0 { 1.0 } else { step as f32 / steps as f32 };
        with_console(&console, |c| {
            c.set_crossfade(position);
            if step % 10 == 0 {
                log_status(c);
            }
            Ok(())
        })?;
        thread::sleep(Duration::from_millis(100));
    }

    thread::sleep(Duration::from_secs(4));
    with_console(&console, |c| {
        log_status(c);
        c.disable_sync();
        c.stop(DeckId::A)?;
        c.stop(DeckId::B)?;
        Ok(())
    })?;

    log::info!("loopmix-player done");
    Ok(())
}
