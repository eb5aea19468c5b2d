//! Loop content analysis
//!
//! - [`boundary`]: where the audible content of a clip starts and ends, and
//!   how much of it is sparse
//! - [`resolver`]: which loop duration to trust, the BPM-derived one or the
//!   detected one

pub mod boundary;
pub mod resolver;

pub use boundary::{AnalysisConfig, BoundaryDetector, ContentAnalysis, ContentBoundaries};
pub use resolver::{
    mathematical_duration, LoopBoundaries, LoopDurationResolver, LoopStrategy, ResolverConfig,
};

/// Convert dBFS to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to dBFS (floored at -120 dB)
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 1e-6 {
        -120.0
    } else {
        20.0 * linear.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversions() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-60.0) - 0.001).abs() < 1e-7);
        assert!((linear_to_db(0.1) + 20.0).abs() < 1e-4);
        assert_eq!(linear_to_db(0.0), -120.0);
    }
}
