//! Pipeline tuning knobs and fixed thresholds

use std::time::Duration;

/// Radius within which a frame joins an existing cluster during the
/// streaming assignment pass (degrees). Generous enough to swallow any
/// dither pattern, small enough to keep distinct targets apart.
pub const ASSIGNMENT_RADIUS_DEG: f64 = 0.1;

/// Header-vs-solve disagreement above this is a false header (degrees).
pub const MISMATCH_THRESHOLD_DEG: f64 = 1.0;

/// Fraction of frames spot-checked by plate solve when nothing is
/// suspicious and rigorous mode is off.
pub const VERIFY_SAMPLE_RATE: f64 = 0.05;

/// Wall-clock budget for one plate solve before the solver process is
/// killed and the frame treated as unverified.
pub const SOLVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Frames with fewer detected stars than this are rejected outright.
pub const MIN_STAR_COUNT: u32 = 20;

/// A statistics snapshot is published every N completed frames (and
/// always after the last one).
pub const STATS_PUBLISH_INTERVAL: usize = 5;

/// Sessions with fewer frames than this get flagged in the scan report.
pub const FEW_FRAMES_THRESHOLD: usize = 10;

/// Behavioral settings for one triage run.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Maximum distance from the session centroid before a frame is
    /// off-target, in arcseconds
    pub dither_tolerance_arcsec: f64,
    /// Minimum acceptable star roundness (1.0 = perfectly round)
    pub min_roundness: f64,
    /// Maximum acceptable FWHM in pixels; None disables the blur gate
    pub max_fwhm: Option<f64>,
    /// Cluster merge tolerance in arcminutes
    pub merge_tolerance_arcmin: f64,
    /// Plate-solve every frame instead of sampling
    pub rigorous: bool,
    /// Compute verdicts and statistics but move no file
    pub dry_run: bool,
    /// Concurrent triage workers
    pub workers: usize,
    /// Seed for the spot-check sampler; None draws from the OS
    pub seed: Option<u64>,
    /// Ask the analyzer to check for optical aberration
    pub check_aberration: bool,
    /// Ask the analyzer to estimate seeing
    pub check_seeing: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            dither_tolerance_arcsec: 120.0,
            min_roundness: 0.80,
            max_fwhm: Some(3.5),
            merge_tolerance_arcmin: 1.0,
            rigorous: false,
            dry_run: false,
            workers: 4,
            seed: None,
            check_aberration: false,
            check_seeing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TriageConfig::default();
        assert_eq!(config.dither_tolerance_arcsec, 120.0);
        assert_eq!(config.min_roundness, 0.80);
        assert_eq!(config.max_fwhm, Some(3.5));
        assert_eq!(config.workers, 4);
        assert!(!config.rigorous);
        assert!(!config.dry_run);
    }
}
