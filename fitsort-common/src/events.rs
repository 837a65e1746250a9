//! Event types for the fitsort event system
//!
//! Provides the shared event definitions and EventBus used by the pipeline
//! core and its observers. The core never talks to a UI directly; it emits
//! `TriageEvent`s and whoever is listening (the CLI, a test harness) renders
//! them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Plate solve disagreed with the header by more than the mismatch
    /// threshold; the header pointing is a lie.
    FalseHeader,
    /// Session mode active but the frame belongs to no selected cluster.
    Unassigned,
    /// Pointing is valid but farther from the session centroid than the
    /// dither tolerance allows.
    OffTarget,
    /// Too few stars detected (clouds, severe defocus).
    InsufficientStars,
    /// Stars too elongated (trailing, wind shake).
    Trailed,
    /// FWHM above the configured maximum.
    ExcessBlur,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::FalseHeader => "false header",
            RejectReason::Unassigned => "unassigned",
            RejectReason::OffTarget => "off-target",
            RejectReason::InsufficientStars => "insufficient stars",
            RejectReason::Trailed => "elongated/trailed",
            RejectReason::ExcessBlur => "excess blur",
        };
        f.write_str(s)
    }
}

/// Terminal verdict for one frame.
///
/// Every submitted frame reaches exactly one of these; the three counters in
/// [`TriageEvent::StatsSnapshot`] always sum to the number of frames
/// submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason")]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
    /// Unexpected processing error caught at the worker boundary. Distinct
    /// from Rejected so accounting never silently drops a frame.
    Errored,
}

impl Verdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected(_))
    }
}

/// Aggregate statistics published while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub accepted: usize,
    pub rejected: usize,
    pub errored: usize,
    /// Mean FWHM over every analyzed frame (None until one is analyzed)
    pub fwhm_mean: Option<f64>,
    /// Population standard deviation of FWHM
    pub fwhm_std_dev: Option<f64>,
    /// Frames strictly below mean - 2 sigma (notably sharper than average)
    pub elite_count: usize,
    pub roundness_mean: Option<f64>,
    /// Worst roundness observed
    pub roundness_min: Option<f64>,
}

/// One detected observing session, as reported after the clustering scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: u32,
    /// Centroid right ascension in degrees
    pub ra: f64,
    /// Centroid declination in degrees
    pub dec: f64,
    pub frame_count: usize,
}

/// fitsort event types
///
/// Events are broadcast via [`EventBus`]. All events serialize with a `type`
/// tag so observers can filter without exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TriageEvent {
    /// Clustering scan started
    ScanStarted {
        /// Number of files to scan
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Clustering scan progress (one event per scanned frame)
    ScanProgress {
        current: usize,
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Clustering scan finished; candidate sessions are final
    ScanCompleted {
        sessions: Vec<SessionSummary>,
        /// Frames excluded from clustering (no valid coordinates)
        ungrouped: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage run started
    RunStarted {
        /// Number of frames submitted for triage
        frames: usize,
        /// True when decisions are computed but no file is moved
        dry_run: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One frame reached its terminal verdict
    FrameCompleted {
        /// File name of the frame
        path: String,
        verdict: Verdict,
        /// Human-readable outcome line
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic aggregate statistics (every 5th frame and on the last)
    StatsSnapshot {
        snapshot: StatsSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage run finished normally
    RunCompleted {
        accepted: usize,
        rejected: usize,
        errored: usize,
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage run stopped early by cancellation
    RunCancelled {
        /// Frames that reached a verdict before the stop
        processed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl TriageEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            TriageEvent::ScanStarted { .. } => "ScanStarted",
            TriageEvent::ScanProgress { .. } => "ScanProgress",
            TriageEvent::ScanCompleted { .. } => "ScanCompleted",
            TriageEvent::RunStarted { .. } => "RunStarted",
            TriageEvent::FrameCompleted { .. } => "FrameCompleted",
            TriageEvent::StatsSnapshot { .. } => "StatsSnapshot",
            TriageEvent::RunCompleted { .. } => "RunCompleted",
            TriageEvent::RunCancelled { .. } => "RunCancelled",
        }
    }
}

/// Central event distribution bus
///
/// Wraps tokio::broadcast, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TriageEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity.
    ///
    /// Old events are dropped once the channel holds `capacity` undelivered
    /// events; 1000 is plenty for interactive runs, tests use 10-100.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if no subscriber is
    /// listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TriageEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<TriageEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening.
    ///
    /// Progress and statistics updates use this: the pipeline must not care
    /// whether an observer is attached.
    pub fn emit_lossy(&self, event: TriageEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> TriageEvent {
        TriageEvent::FrameCompleted {
            path: "light_0001.fits".to_string(),
            verdict: Verdict::Rejected(RejectReason::OffTarget),
            message: "off-target (131.2\")".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_and_receive() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(sample_event()).expect("emit should succeed");
        let received = rx.try_recv().expect("should receive event");
        assert_eq!(received.event_type(), "FrameCompleted");
    }

    #[test]
    fn test_eventbus_emit_lossy_without_subscribers() {
        let bus = EventBus::new(2);
        // No subscriber, channel small: must not panic or error out.
        for _ in 0..10 {
            bus.emit_lossy(sample_event());
        }
    }

    #[test]
    fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(sample_event()).expect("emit should succeed");

        assert_eq!(rx1.try_recv().unwrap().event_type(), "FrameCompleted");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "FrameCompleted");
    }

    #[test]
    fn test_verdict_serialization_round_trip() {
        let verdict = Verdict::Rejected(RejectReason::FalseHeader);
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("Rejected"));
        assert!(json.contains("FalseHeader"));

        let parsed: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, verdict);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TriageEvent::StatsSnapshot {
            snapshot: StatsSnapshot {
                accepted: 3,
                rejected: 1,
                errored: 0,
                fwhm_mean: Some(2.41),
                fwhm_std_dev: Some(0.12),
                elite_count: 0,
                roundness_mean: Some(0.91),
                roundness_min: Some(0.84),
            },
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"StatsSnapshot\""));
        assert!(json.contains("\"accepted\":3"));
    }

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(RejectReason::FalseHeader.to_string(), "false header");
        assert_eq!(RejectReason::InsufficientStars.to_string(), "insufficient stars");
        assert_eq!(RejectReason::Trailed.to_string(), "elongated/trailed");
    }
}
