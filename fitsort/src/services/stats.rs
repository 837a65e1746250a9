//! Live run statistics
//!
//! Shared by every triage worker. Counters are atomics; the sharpness and
//! roundness samples live behind a mutex because snapshots need the full
//! population, not a running sum.

use crate::config::STATS_PUBLISH_INTERVAL;
use fitsort_common::events::{StatsSnapshot, TriageEvent, Verdict};
use fitsort_common::EventBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct QualitySamples {
    fwhm: Vec<f64>,
    roundness: Vec<f64>,
}

pub struct RunningStats {
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    errored: AtomicUsize,
    processed: AtomicUsize,
    total: usize,
    samples: Mutex<QualitySamples>,
    bus: EventBus,
}

impl RunningStats {
    pub fn new(bus: EventBus, total: usize) -> Self {
        Self {
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            errored: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            total,
            samples: Mutex::new(QualitySamples::default()),
            bus,
        }
    }

    pub fn record_verdict(&self, verdict: Verdict) {
        match verdict {
            Verdict::Accepted => self.accepted.fetch_add(1, Ordering::SeqCst),
            Verdict::Rejected(_) => self.rejected.fetch_add(1, Ordering::SeqCst),
            Verdict::Errored => self.errored.fetch_add(1, Ordering::SeqCst),
        };
    }

    /// Record quality samples for a frame that reached analysis, whatever
    /// its verdict turned out to be.
    pub fn record_quality(&self, fwhm: f64, roundness: f64) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.fwhm.push(fwhm);
            samples.roundness.push(roundness);
        }
    }

    /// Mark one frame fully done and publish a snapshot on the reporting
    /// cadence. Returns the processed count including this frame.
    pub fn frame_done(&self) -> usize {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if processed % STATS_PUBLISH_INTERVAL == 0 || processed == self.total {
            self.publish();
        }
        processed
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.accepted.load(Ordering::SeqCst),
            self.rejected.load(Ordering::SeqCst),
            self.errored.load(Ordering::SeqCst),
        )
    }

    pub fn publish(&self) {
        self.bus.emit_lossy(TriageEvent::StatsSnapshot {
            snapshot: self.snapshot(),
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (accepted, rejected, errored) = self.counts();
        let samples = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let (fwhm_mean, fwhm_std_dev, elite_count) = fwhm_profile(&samples.fwhm);
        let roundness_mean = mean(&samples.roundness);
        let roundness_min = samples
            .roundness
            .iter()
            .copied()
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |m| m.min(v)))
            });

        StatsSnapshot {
            accepted,
            rejected,
            errored,
            fwhm_mean,
            fwhm_std_dev,
            elite_count,
            roundness_mean,
            roundness_min,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean, population standard deviation, and the count of frames strictly
/// sharper than mean minus two sigma.
fn fwhm_profile(values: &[f64]) -> (Option<f64>, Option<f64>, usize) {
    let Some(m) = mean(values) else {
        return (None, None, 0);
    };
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    let std_dev = variance.sqrt();
    let threshold = m - 2.0 * std_dev;
    let elite = values.iter().filter(|&&v| v < threshold).count();
    (Some(m), Some(std_dev), elite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitsort_common::events::RejectReason;

    fn stats(total: usize) -> RunningStats {
        RunningStats::new(EventBus::new(100), total)
    }

    #[test]
    fn test_verdict_counters() {
        let s = stats(10);
        s.record_verdict(Verdict::Accepted);
        s.record_verdict(Verdict::Accepted);
        s.record_verdict(Verdict::Rejected(RejectReason::Trailed));
        s.record_verdict(Verdict::Errored);
        assert_eq!(s.counts(), (2, 1, 1));
    }

    #[test]
    fn test_empty_snapshot_has_no_quality_fields() {
        let snap = stats(0).snapshot();
        assert_eq!(snap.fwhm_mean, None);
        assert_eq!(snap.fwhm_std_dev, None);
        assert_eq!(snap.roundness_min, None);
        assert_eq!(snap.elite_count, 0);
    }

    #[test]
    fn test_elite_requires_strictly_below_threshold() {
        // Nine at 3.0 and one at 1.0: mean 2.8, sigma 0.6, threshold 1.6.
        let values: Vec<f64> = std::iter::repeat(3.0).take(9).chain([1.0]).collect();
        let (m, sd, elite) = fwhm_profile(&values);
        assert!((m.unwrap() - 2.8).abs() < 1e-9);
        assert!((sd.unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(elite, 1);

        // A uniform population has sigma 0; nothing is strictly below the
        // mean, so nothing is elite.
        let (_, _, elite) = fwhm_profile(&[2.0, 2.0, 2.0]);
        assert_eq!(elite, 0);
    }

    #[test]
    fn test_roundness_min_and_mean() {
        let s = stats(3);
        s.record_quality(2.0, 0.90);
        s.record_quality(2.2, 0.70);
        s.record_quality(2.4, 0.95);
        let snap = s.snapshot();
        assert!((snap.roundness_mean.unwrap() - 0.85).abs() < 1e-9);
        assert_eq!(snap.roundness_min, Some(0.70));
    }

    #[test]
    fn test_publish_cadence_every_fifth_and_final() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let s = RunningStats::new(bus, 7);

        for _ in 0..7 {
            s.record_verdict(Verdict::Accepted);
            s.frame_done();
        }

        let mut snapshots = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TriageEvent::StatsSnapshot { .. }) {
                snapshots += 1;
            }
        }
        // Published at frame 5 and at frame 7 (the final one).
        assert_eq!(snapshots, 2);
    }
}
