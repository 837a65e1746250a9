//! Concurrent triage pipeline
//!
//! Phase 2 of a run: every frame flows through target lookup, adaptive
//! header verification, the dither gate, quality analysis, and routing.
//! Frames are processed by a bounded pool of workers; each frame is
//! independent, so a failure in one never takes down the run.

use crate::config::{MIN_STAR_COUNT, TriageConfig};
use crate::services::clusterer::Cluster;
use crate::services::plate_solver::PlateSolver;
use crate::services::quality::{AnalyzerOptions, QualityAnalyzer};
use crate::services::router::FrameRouter;
use crate::services::stats::RunningStats;
use crate::services::verification::{VerificationGate, VerificationOutcome};
use crate::types::FrameInfo;
use fitsort_common::events::{RejectReason, TriageEvent, Verdict};
use fitsort_common::{CelestialPoint, EventBus};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What the run is triaging against.
#[derive(Debug, Clone)]
pub enum TargetMode {
    /// Selected observing sessions; accepted frames move into per-session
    /// folders.
    Sessions(Vec<Cluster>),
    /// One known target; accepted frames stay where they are.
    SingleTarget(CelestialPoint),
}

/// Final accounting for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub accepted: usize,
    pub rejected: usize,
    pub errored: usize,
    /// Frames that reached a verdict (equals `submitted` unless cancelled)
    pub processed: usize,
    pub submitted: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

struct RunContext {
    config: TriageConfig,
    gate: VerificationGate,
    analyzer: Arc<dyn QualityAnalyzer>,
    router: FrameRouter,
    stats: RunningStats,
    bus: EventBus,
    session_mode: bool,
    centroids: HashMap<u32, CelestialPoint>,
    manual_target: Option<CelestialPoint>,
}

pub struct TriagePipeline {
    config: TriageConfig,
    solver: Arc<dyn PlateSolver>,
    analyzer: Arc<dyn QualityAnalyzer>,
    root: std::path::PathBuf,
    bus: EventBus,
}

impl TriagePipeline {
    pub fn new(
        config: TriageConfig,
        solver: Arc<dyn PlateSolver>,
        analyzer: Arc<dyn QualityAnalyzer>,
        root: std::path::PathBuf,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            solver,
            analyzer,
            root,
            bus,
        }
    }

    /// Run triage over `frames` until done or cancelled.
    ///
    /// Cancellation is honored before each frame is dispatched; frames
    /// already in flight finish and are counted, so the verdict counters
    /// always sum to `processed`.
    pub async fn run(
        &self,
        frames: Vec<FrameInfo>,
        mode: TargetMode,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let submitted = frames.len();

        let (session_mode, centroids, manual_target) = match mode {
            TargetMode::Sessions(clusters) => {
                let centroids = clusters.iter().map(|c| (c.id, c.centroid)).collect();
                (true, centroids, None)
            }
            TargetMode::SingleTarget(target) => (false, HashMap::new(), Some(target)),
        };

        let ctx = Arc::new(RunContext {
            gate: VerificationGate::new(
                Arc::clone(&self.solver),
                self.config.rigorous,
                self.config.seed,
            ),
            analyzer: Arc::clone(&self.analyzer),
            router: FrameRouter::new(self.root.clone()),
            stats: RunningStats::new(self.bus.clone(), submitted),
            bus: self.bus.clone(),
            session_mode,
            centroids,
            manual_target,
            config: self.config.clone(),
        });

        self.bus.emit_lossy(TriageEvent::RunStarted {
            frames: submitted,
            dry_run: self.config.dry_run,
            timestamp: chrono::Utc::now(),
        });
        tracing::info!(
            frames = submitted,
            workers = self.config.workers,
            dry_run = self.config.dry_run,
            "Triage run started"
        );

        futures::stream::iter(frames)
            .map(|frame| {
                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    triage_one(&ctx, frame).await;
                }
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect::<Vec<()>>()
            .await;

        let (accepted, rejected, errored) = ctx.stats.counts();
        let processed = ctx.stats.processed();
        let cancelled = cancel.is_cancelled();
        let duration = started.elapsed();

        if cancelled {
            if processed < submitted {
                ctx.stats.publish();
            }
            self.bus.emit_lossy(TriageEvent::RunCancelled {
                processed,
                timestamp: chrono::Utc::now(),
            });
            tracing::info!(processed, submitted, "Triage run cancelled");
        } else {
            self.bus.emit_lossy(TriageEvent::RunCompleted {
                accepted,
                rejected,
                errored,
                duration_seconds: duration.as_secs(),
                timestamp: chrono::Utc::now(),
            });
            tracing::info!(accepted, rejected, errored, "Triage run completed");
        }

        RunReport {
            accepted,
            rejected,
            errored,
            processed,
            submitted,
            cancelled,
            duration,
        }
    }
}

/// Take one frame to its terminal verdict. Never propagates an error;
/// anything unexpected becomes [`Verdict::Errored`].
async fn triage_one(ctx: &RunContext, frame: FrameInfo) {
    let path = frame.path.clone();
    let file_name = frame.file_name();
    let cluster_id = frame.cluster_id;

    let (mut verdict, mut message) = match evaluate(ctx, frame).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(file = %file_name, error = %e, "Frame processing failed");
            (Verdict::Errored, format!("processing error: {e}"))
        }
    };

    if !ctx.config.dry_run {
        if let Some(dest) = ctx.router.destination(&verdict, cluster_id, ctx.session_mode) {
            if let Err(e) = ctx.router.route(&path, &dest) {
                tracing::error!(file = %file_name, error = %e, "Failed to move frame");
                verdict = Verdict::Errored;
                message = format!("move failed: {e}");
            }
        }
    }

    ctx.stats.record_verdict(verdict);
    ctx.bus.emit_lossy(TriageEvent::FrameCompleted {
        path: file_name,
        verdict,
        message,
        timestamp: chrono::Utc::now(),
    });
    ctx.stats.frame_done();
}

/// The decision ladder. Earlier gates win; quality is only consulted for
/// frames that are on a plausible pointing.
async fn evaluate(ctx: &RunContext, mut frame: FrameInfo) -> anyhow::Result<(Verdict, String)> {
    let target = if ctx.session_mode {
        frame.cluster_id.and_then(|id| ctx.centroids.get(&id).copied())
    } else {
        ctx.manual_target
    };

    match ctx.gate.check(&frame).await {
        VerificationOutcome::Mismatch { separation_deg } => {
            return Ok((
                Verdict::Rejected(RejectReason::FalseHeader),
                format!("false header (off by {separation_deg:.2} deg)"),
            ));
        }
        VerificationOutcome::Confirmed { solved } => {
            frame.working_coord = Some(solved);
        }
        VerificationOutcome::Skipped | VerificationOutcome::Unverified => {}
    }

    if ctx.session_mode && target.is_none() {
        return Ok((
            Verdict::Rejected(RejectReason::Unassigned),
            "no session assignment".to_string(),
        ));
    }

    if let (Some(coord), Some(target)) = (frame.working_coord, target) {
        let offset_arcsec = coord.separation_arcsec(&target);
        if offset_arcsec > ctx.config.dither_tolerance_arcsec {
            return Ok((
                Verdict::Rejected(RejectReason::OffTarget),
                format!("off-target ({offset_arcsec:.1}\")"),
            ));
        }
    }

    let options = AnalyzerOptions {
        check_fwhm: true,
        check_aberration: ctx.config.check_aberration,
        check_seeing: ctx.config.check_seeing,
    };
    let report = ctx.analyzer.analyze(&frame.path, options).await?;
    ctx.stats.record_quality(report.fwhm, report.roundness);

    if report.star_count < MIN_STAR_COUNT {
        return Ok((
            Verdict::Rejected(RejectReason::InsufficientStars),
            format!("insufficient stars ({})", report.star_count),
        ));
    }
    if report.roundness < ctx.config.min_roundness {
        return Ok((
            Verdict::Rejected(RejectReason::Trailed),
            format!("elongated/trailed (R {:.3})", report.roundness),
        ));
    }
    if let Some(max_fwhm) = ctx.config.max_fwhm {
        if report.fwhm > max_fwhm {
            return Ok((
                Verdict::Rejected(RejectReason::ExcessBlur),
                format!("excess blur (FWHM {:.2})", report.fwhm),
            ));
        }
    }

    let session_tag = frame
        .cluster_id
        .map(|id| format!("S{id} | "))
        .unwrap_or_default();
    Ok((
        Verdict::Accepted,
        format!(
            "ok | {}R {:.3} | FWHM {:.2}",
            session_tag, report.roundness, report.fwhm
        ),
    ))
}
