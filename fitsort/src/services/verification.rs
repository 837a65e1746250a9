//! Adaptive header verification
//!
//! Headers normally tell the truth, so solving every frame would waste
//! minutes per run. The gate spot-checks a random sample; the moment a
//! solve contradicts a header, a shared suspicion level jumps to maximum
//! and every subsequent frame is checked until consecutive confirmations
//! walk it back down.

use crate::config::{MISMATCH_THRESHOLD_DEG, VERIFY_SAMPLE_RATE};
use crate::services::plate_solver::PlateSolver;
use crate::types::FrameInfo;
use fitsort_common::CelestialPoint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

pub const MAX_SUSPICION: i32 = 5;

/// Shared distrust level, 0 (calm) to [`MAX_SUSPICION`].
///
/// Written and read concurrently by every triage worker.
#[derive(Debug, Default)]
pub struct SuspicionLevel(AtomicI32);

impl SuspicionLevel {
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }

    /// A mismatch was found: jump straight to maximum.
    pub fn escalate(&self) {
        self.0.store(MAX_SUSPICION, Ordering::SeqCst);
    }

    /// A forced check confirmed the header: step down one, never below 0.
    pub fn relax(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });
    }
}

/// What the gate concluded about one frame's header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerificationOutcome {
    /// Not selected for checking; the header stays trusted by default.
    Skipped,
    /// Checked, but the solver failed or found no solution. The header
    /// stays in use, unverified.
    Unverified,
    /// Solve agreed with the header; the solved center is the better value.
    Confirmed { solved: CelestialPoint },
    /// Solve contradicted the header by more than the threshold.
    Mismatch { separation_deg: f64 },
}

pub struct VerificationGate {
    solver: Arc<dyn PlateSolver>,
    suspicion: SuspicionLevel,
    rigorous: bool,
    sample_rate: f64,
    rng: Mutex<StdRng>,
}

impl VerificationGate {
    pub fn new(solver: Arc<dyn PlateSolver>, rigorous: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            solver,
            suspicion: SuspicionLevel::default(),
            rigorous,
            sample_rate: VERIFY_SAMPLE_RATE,
            rng: Mutex::new(rng),
        }
    }

    pub fn suspicion(&self) -> i32 {
        self.suspicion.get()
    }

    /// Decide whether this frame gets a plate solve and, if so, compare the
    /// solved center against the header pointing.
    pub async fn check(&self, frame: &FrameInfo) -> VerificationOutcome {
        let Some(header) = frame.working_coord else {
            return VerificationOutcome::Skipped;
        };

        let suspicion_before = self.suspicion.get();
        if !self.should_check(suspicion_before) {
            return VerificationOutcome::Skipped;
        }

        let solved = match self.solver.solve(&frame.path).await {
            Ok(Some(solved)) => solved,
            Ok(None) => {
                tracing::warn!(file = %frame.file_name(), "Plate solve found no solution");
                return VerificationOutcome::Unverified;
            }
            Err(e) => {
                tracing::warn!(file = %frame.file_name(), error = %e, "Plate solve failed");
                return VerificationOutcome::Unverified;
            }
        };

        let separation_deg = header.separation_deg(&solved);
        if separation_deg > MISMATCH_THRESHOLD_DEG {
            self.suspicion.escalate();
            tracing::warn!(
                file = %frame.file_name(),
                header = %header,
                solved = %solved,
                separation_deg,
                "Header contradicts plate solve"
            );
            VerificationOutcome::Mismatch { separation_deg }
        } else {
            if suspicion_before > 0 {
                self.suspicion.relax();
            }
            VerificationOutcome::Confirmed { solved }
        }
    }

    /// Check when rigorous mode is on, when anything is suspicious, or for
    /// a random sample of calm frames. Short-circuits so the sampler is
    /// only consulted when the first two say no.
    fn should_check(&self, suspicion: i32) -> bool {
        if self.rigorous || suspicion > 0 {
            return true;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<f64>() < self.sample_rate,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::plate_solver::SolveError;
    use async_trait::async_trait;
    use std::path::Path;

    struct FixedSolver(Option<CelestialPoint>);

    #[async_trait]
    impl PlateSolver for FixedSolver {
        async fn solve(&self, _frame: &Path) -> Result<Option<CelestialPoint>, SolveError> {
            Ok(self.0)
        }
    }

    struct FailingSolver;

    #[async_trait]
    impl PlateSolver for FailingSolver {
        async fn solve(&self, _frame: &Path) -> Result<Option<CelestialPoint>, SolveError> {
            Err(SolveError::Timeout(std::time::Duration::from_secs(15)))
        }
    }

    fn frame_at(ra: f64, dec: f64) -> FrameInfo {
        FrameInfo::new("x.fits".into(), Some(CelestialPoint::new(ra, dec)))
    }

    #[test]
    fn test_suspicion_clamped_between_zero_and_max() {
        let level = SuspicionLevel::default();
        level.relax();
        assert_eq!(level.get(), 0);
        level.escalate();
        level.escalate();
        assert_eq!(level.get(), MAX_SUSPICION);
        for _ in 0..10 {
            level.relax();
        }
        assert_eq!(level.get(), 0);
    }

    #[test]
    fn test_suspicion_stays_in_bounds_under_contention() {
        let level = Arc::new(SuspicionLevel::default());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let level = Arc::clone(&level);
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    if (i + worker) % 3 == 0 {
                        level.escalate();
                    } else {
                        level.relax();
                    }
                    let v = level.get();
                    assert!((0..=MAX_SUSPICION).contains(&v));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_mismatch_escalates_to_max() {
        let solver = Arc::new(FixedSolver(Some(CelestialPoint::new(12.3, 22.3))));
        let gate = VerificationGate::new(solver, true, Some(1));

        let outcome = gate.check(&frame_at(10.0, 20.0)).await;
        match outcome {
            VerificationOutcome::Mismatch { separation_deg } => {
                assert!(separation_deg > MISMATCH_THRESHOLD_DEG);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert_eq!(gate.suspicion(), MAX_SUSPICION);
    }

    #[tokio::test]
    async fn test_confirmations_walk_suspicion_back_down() {
        let solver = Arc::new(FixedSolver(Some(CelestialPoint::new(10.001, 20.001))));
        let gate = VerificationGate::new(solver, false, Some(1));
        gate.suspicion.escalate();

        for expected in (0..MAX_SUSPICION).rev() {
            let outcome = gate.check(&frame_at(10.0, 20.0)).await;
            assert!(matches!(outcome, VerificationOutcome::Confirmed { .. }));
            assert_eq!(gate.suspicion(), expected);
        }
    }

    #[tokio::test]
    async fn test_solver_failure_is_unverified_not_mismatch() {
        let gate = VerificationGate::new(Arc::new(FailingSolver), true, Some(1));
        let outcome = gate.check(&frame_at(10.0, 20.0)).await;
        assert_eq!(outcome, VerificationOutcome::Unverified);
        assert_eq!(gate.suspicion(), 0);
    }

    #[tokio::test]
    async fn test_frame_without_coordinates_is_skipped() {
        let gate = VerificationGate::new(Arc::new(FailingSolver), true, Some(1));
        let frame = FrameInfo::new("blind.fits".into(), None);
        assert_eq!(gate.check(&frame).await, VerificationOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_calm_sampling_is_reproducible_with_seed() {
        let decisions = |seed| async move {
            let gate = VerificationGate::new(
                Arc::new(FixedSolver(Some(CelestialPoint::new(10.0, 20.0)))),
                false,
                Some(seed),
            );
            let mut picked = Vec::new();
            for _ in 0..50 {
                let outcome = gate.check(&frame_at(10.0, 20.0)).await;
                picked.push(outcome != VerificationOutcome::Skipped);
            }
            picked
        };
        assert_eq!(decisions(7).await, decisions(7).await);
    }
}
