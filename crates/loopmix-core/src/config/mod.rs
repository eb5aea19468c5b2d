//! Engine configuration
//!
//! Every tunable lives in one [`EngineConfig`], stored as `loopmix.yaml` in
//! the platform config directory. Missing fields take their defaults, so a
//! file only needs the values it changes:
//!
//! ```yaml
//! scheduler:
//!   lookahead_ms: 150
//! filters:
//!   hi_cut_hz: 1500
//! default_loop_bars: 16
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config, try_load_config};
pub use paths::{config_dir, default_config_path, CONFIG_FILE_NAME};

use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisConfig, ResolverConfig};
use crate::audio::AudioConfig;
use crate::engine::SyncConfig;

/// Control-thread timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Control tick interval
    pub tick_interval_ms: u64,
    /// How far ahead loop restarts are queued
    pub lookahead_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 25,
            lookahead_ms: 100.0,
        }
    }
}

impl SchedulerConfig {
    pub fn lookahead_seconds(&self) -> f64 {
        self.lookahead_ms.max(0.0) / 1000.0
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Hi-cut / lo-cut switch targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Low-pass cutoff when hi-cut is on
    pub hi_cut_hz: f32,
    /// High-pass cutoff when lo-cut is on
    pub lo_cut_hz: f32,
    /// Cutoff glide time on the render path
    pub ramp_ms: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            hi_cut_hz: 2000.0,
            lo_cut_hz: 500.0,
            ramp_ms: crate::engine::DEFAULT_FILTER_RAMP_MS,
        }
    }
}

/// Everything the engine reads at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub scheduler: SchedulerConfig,
    pub sync: SyncConfig,
    pub filters: FilterConfig,
    pub analysis: AnalysisConfig,
    pub resolver: ResolverConfig,
    /// Loop length for tracks that carry no bar count
    pub default_loop_bars: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
            filters: FilterConfig::default(),
            analysis: AnalysisConfig::default(),
            resolver: ResolverConfig::default(),
            default_loop_bars: 8,
        }
    }
}
