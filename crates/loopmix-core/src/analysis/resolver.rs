//! Loop duration resolution
//!
//! The BPM-derived duration (`bars * 4 * 60 / bpm`) is the default. Detected
//! content only overrides it when the file is too short for the musical
//! length, or when the content is clearly padded with silence. Rules are
//! evaluated in order and the first match wins:
//!
//! 1. High confidence and content within tolerance of the musical length
//! 2. Sparse (vocal, one-shot) content: detection is unreliable
//! 3. File shorter than the musical length: bounded by the file
//! 4. Content much shorter with decent confidence: trimmed and grid-snapped
//! 5. Fallback to the musical length

use serde::{Deserialize, Serialize};

use super::boundary::ContentAnalysis;
use crate::error::{EngineError, EngineResult};
use crate::types::BEATS_PER_BAR;

/// Resolver thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Confidence above which a matching detection is trusted
    pub high_confidence: f32,
    /// Relative tolerance for "content matches the musical length"
    pub match_tolerance: f64,
    /// Sparse fraction above which detection is ignored
    pub sparse_fraction: f32,
    /// File shorter than this share of the musical length is file-limited
    pub file_limited_ratio: f64,
    /// Content shorter than this share of the musical length is padded
    pub padded_ratio: f64,
    /// Confidence needed to trust a padded detection
    pub padded_confidence: f32,
    /// Grid for trimmed durations, in divisions per bar
    pub snap_division: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.8,
            match_tolerance: 0.10,
            sparse_fraction: 0.2,
            file_limited_ratio: 0.85,
            padded_ratio: 0.70,
            padded_confidence: 0.6,
            snap_division: 32,
        }
    }
}

/// Rule that produced the loop duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStrategy {
    HighConfidenceMatch,
    SparseContent,
    FileLengthLimited,
    SilencePadded,
    Fallback,
}

impl LoopStrategy {
    pub fn label(self) -> &'static str {
        match self {
            LoopStrategy::HighConfidenceMatch => "mathematical (high confidence match)",
            LoopStrategy::SparseContent => "mathematical (vocal/sparse content)",
            LoopStrategy::FileLengthLimited => "file-length limited",
            LoopStrategy::SilencePadded => "content-trimmed (silence padded)",
            LoopStrategy::Fallback => "mathematical (fallback)",
        }
    }

    /// Whether the duration came from BPM math rather than detected content
    pub fn is_mathematical(self) -> bool {
        matches!(
            self,
            LoopStrategy::HighConfidenceMatch | LoopStrategy::SparseContent | LoopStrategy::Fallback
        )
    }
}

impl std::fmt::Display for LoopStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved loop geometry for a deck
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopBoundaries {
    pub content_start_seconds: f64,
    pub content_end_seconds: f64,
    pub mathematical_duration_seconds: f64,
    /// Authoritative loop length, always > 0
    pub actual_loop_duration_seconds: f64,
    pub confidence: f32,
    pub strategy: LoopStrategy,
}

/// `bars * 4 * 60 / bpm`
pub fn mathematical_duration(bpm: f64, bars: u32) -> f64 {
    bars as f64 * BEATS_PER_BAR as f64 * (60.0 / bpm)
}

/// Picks the authoritative loop duration
#[derive(Debug, Clone, Default)]
pub struct LoopDurationResolver {
    config: ResolverConfig,
}

impl LoopDurationResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(
        &self,
        bpm: f64,
        bars: u32,
        analysis: &ContentAnalysis,
    ) -> EngineResult<LoopBoundaries> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(EngineError::InvalidParameter(format!("bpm {}", bpm)));
        }
        if bars == 0 {
            return Err(EngineError::InvalidParameter("bars must be >= 1".into()));
        }

        let math = mathematical_duration(bpm, bars);

        let Some(content) = analysis.boundaries else {
            log::debug!("No content boundaries, using {:.3}s", math);
            return Ok(LoopBoundaries {
                content_start_seconds: 0.0,
                content_end_seconds: analysis.file_duration_seconds,
                mathematical_duration_seconds: math,
                actual_loop_duration_seconds: math,
                confidence: 0.0,
                strategy: LoopStrategy::Fallback,
            });
        };

        let cfg = &self.config;
        let confidence = content.confidence;
        let content_duration = content.duration_seconds();
        let file_duration = analysis.file_duration_seconds;

        let (strategy, duration) = if confidence > cfg.high_confidence
            && (content_duration - math).abs() <= math * cfg.match_tolerance
        {
            (LoopStrategy::HighConfidenceMatch, math)
        } else if analysis.sparse_fraction > cfg.sparse_fraction {
            (LoopStrategy::SparseContent, math)
        } else if file_duration < math * cfg.file_limited_ratio {
            (LoopStrategy::FileLengthLimited, content_duration.min(file_duration))
        } else if content_duration < math * cfg.padded_ratio && confidence > cfg.padded_confidence {
            let bar = mathematical_duration(bpm, 1);
            let grid = bar / cfg.snap_division.max(1) as f64;
            (LoopStrategy::SilencePadded, (content_duration / grid).round() * grid)
        } else {
            (LoopStrategy::Fallback, math)
        };

        let (strategy, duration) = if duration > 0.0 && duration.is_finite() {
            (strategy, duration)
        } else {
            log::debug!("{} produced {:.4}s, falling back", strategy, duration);
            (LoopStrategy::Fallback, math)
        };

        log::debug!(
            "Loop {:.4}s via {} (math {:.4}s, content {:.4}s, confidence {:.2})",
            duration,
            strategy,
            math,
            content_duration,
            confidence
        );

        Ok(LoopBoundaries {
            content_start_seconds: content.start_seconds(),
            content_end_seconds: content.end_seconds(),
            mathematical_duration_seconds: math,
            actual_loop_duration_seconds: duration,
            confidence,
            strategy,
        })
    }
}
