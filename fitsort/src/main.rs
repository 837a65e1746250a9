//! fitsort command line interface
//!
//! Scans a folder of FITS exposures, reports the detected observing
//! sessions, then triages the frames into per-session and reject folders.

use anyhow::{bail, Context};
use clap::Parser;
use fitsort::config::{SOLVE_TIMEOUT, FEW_FRAMES_THRESHOLD, TriageConfig};
use fitsort::pipeline::{TargetMode, TriagePipeline};
use fitsort::services::clusterer::SpatialClusterer;
use fitsort::services::header::FitsHeaderReader;
use fitsort::services::plate_solver::AstapSolver;
use fitsort::services::quality::AnalyzerCommand;
use fitsort::services::scanner;
use fitsort::services::sesame::SesameClient;
use fitsort_common::config::{default_astap_path, load_tool_config, resolve_tool_path};
use fitsort_common::events::{TriageEvent, Verdict};
use fitsort_common::{CelestialPoint, EventBus};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fitsort", about = "Session-aware triage for astrophoto FITS frames")]
struct Cli {
    /// Folder containing the exposures to triage
    folder: PathBuf,

    /// Single target mode: target center as "RA,DEC" in degrees
    #[arg(long, value_name = "RA,DEC", conflicts_with = "object")]
    target: Option<String>,

    /// Single target mode: resolve the target by catalog name (Sesame)
    #[arg(long, value_name = "NAME")]
    object: Option<String>,

    /// Session ids to triage, comma separated (default: all detected)
    #[arg(long, value_delimiter = ',', value_name = "ID")]
    sessions: Vec<u32>,

    /// Compute verdicts and statistics without moving any file
    #[arg(long)]
    dry_run: bool,

    /// Plate-solve every frame instead of spot-checking
    #[arg(long)]
    rigorous: bool,

    /// Concurrent triage workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Seed for the spot-check sampler (reproducible runs)
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum distance from the session center, arcseconds
    #[arg(long, default_value_t = 120.0, value_name = "ARCSEC")]
    dither_tolerance: f64,

    /// Cluster merge tolerance, arcminutes
    #[arg(long, default_value_t = 1.0, value_name = "ARCMIN")]
    merge_tolerance: f64,

    /// Minimum acceptable star roundness
    #[arg(long, default_value_t = 0.80)]
    min_roundness: f64,

    /// Maximum acceptable FWHM, pixels
    #[arg(long, default_value_t = 3.5)]
    max_fwhm: f64,

    /// Disable the FWHM gate entirely
    #[arg(long)]
    no_fwhm_gate: bool,

    /// Ask the analyzer to check for corner aberration
    #[arg(long)]
    check_aberration: bool,

    /// Ask the analyzer to estimate seeing
    #[arg(long)]
    check_seeing: bool,

    /// ASTAP executable
    #[arg(long, value_name = "PATH")]
    astap: Option<String>,

    /// ASTAP star database directory
    #[arg(long, value_name = "PATH")]
    astap_db: Option<String>,

    /// Quality analyzer executable
    #[arg(long, value_name = "PATH")]
    analyzer: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fitsort=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let tool_config = load_tool_config()?;

    let astap_path = resolve_tool_path(
        cli.astap.as_deref(),
        "FITSORT_ASTAP_PATH",
        tool_config.astap_path.as_ref(),
        Some(default_astap_path()),
    )
    .context("No ASTAP path resolved")?;
    let astap_db = resolve_tool_path(
        cli.astap_db.as_deref(),
        "FITSORT_ASTAP_DB_PATH",
        tool_config.astap_db_path.as_ref(),
        None,
    );
    let analyzer_path = resolve_tool_path(
        cli.analyzer.as_deref(),
        "FITSORT_ANALYZER_PATH",
        tool_config.analyzer_path.as_ref(),
        Some(PathBuf::from("star-metrics")),
    )
    .context("No analyzer path resolved")?;

    let analyzer = AnalyzerCommand::new(analyzer_path.clone());
    if !analyzer.is_available() {
        bail!("Quality analyzer not found at {}", analyzer_path.display());
    }

    let config = TriageConfig {
        dither_tolerance_arcsec: cli.dither_tolerance,
        min_roundness: cli.min_roundness,
        max_fwhm: if cli.no_fwhm_gate {
            None
        } else {
            Some(cli.max_fwhm)
        },
        merge_tolerance_arcmin: cli.merge_tolerance,
        rigorous: cli.rigorous,
        dry_run: cli.dry_run,
        workers: cli.workers,
        seed: cli.seed,
        check_aberration: cli.check_aberration,
        check_seeing: cli.check_seeing,
    };

    let manual_target = match (&cli.target, &cli.object) {
        (Some(spec), _) => Some(parse_target(spec)?),
        (None, Some(name)) => {
            let client = SesameClient::new()?;
            match client.resolve(name).await? {
                Some(coord) => {
                    println!("Resolved {name} to {coord}");
                    Some(coord)
                }
                None => bail!("Sesame does not know the object {name:?}"),
            }
        }
        (None, None) => None,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Stopping; in-flight frames will finish");
                cancel.cancel();
            }
        });
    }

    let bus = EventBus::new(1024);
    let printer = spawn_printer(&bus, cli.dry_run);

    let files = scanner::discover_frames(&cli.folder)?;
    if files.is_empty() {
        bail!("No FITS files found in {}", cli.folder.display());
    }

    // Phase 1: read headers, and in session mode cluster the pointings.
    let (frames, mode) = match manual_target {
        Some(target) => {
            let frames =
                tokio::task::spawn_blocking(move || scanner::read_headers(files, &FitsHeaderReader))
                    .await?;
            (frames, TargetMode::SingleTarget(target))
        }
        None => {
            let clusterer = SpatialClusterer::new(config.merge_tolerance_arcmin);
            let scan_bus = bus.clone();
            let scan_cancel = cancel.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                clusterer.scan(files, &FitsHeaderReader, &scan_bus, &scan_cancel)
            })
            .await?;
            if outcome.cancelled {
                return Ok(());
            }
            if outcome.clusters.is_empty() {
                bail!("No session detected; no frame carries usable coordinates");
            }

            let selected: HashSet<u32> = if cli.sessions.is_empty() {
                outcome.clusters.iter().map(|c| c.id).collect()
            } else {
                let known: HashSet<u32> = outcome.clusters.iter().map(|c| c.id).collect();
                for id in cli.sessions.iter().filter(|id| !known.contains(id)) {
                    bail!("Unknown session id {id}");
                }
                cli.sessions.iter().copied().collect()
            };

            let clusters: Vec<_> = outcome
                .clusters
                .into_iter()
                .filter(|c| selected.contains(&c.id))
                .collect();
            let frames: Vec<_> = outcome
                .frames
                .into_iter()
                .filter(|f| f.cluster_id.map_or(false, |id| selected.contains(&id)))
                .collect();
            (frames, TargetMode::Sessions(clusters))
        }
    };

    let solver = Arc::new(AstapSolver::new(astap_path, astap_db, SOLVE_TIMEOUT));
    let pipeline = TriagePipeline::new(
        config,
        solver,
        Arc::new(analyzer),
        cli.folder.clone(),
        bus.clone(),
    );

    let report = pipeline.run(frames, mode, cancel).await;

    // Close the bus so the printer drains and exits.
    drop(pipeline);
    drop(bus);
    let _ = printer.await;

    if report.cancelled {
        std::process::exit(130);
    }
    Ok(())
}

fn parse_target(spec: &str) -> anyhow::Result<CelestialPoint> {
    let (ra, dec) = spec
        .split_once(',')
        .context("Target must be \"RA,DEC\" in degrees")?;
    let ra: f64 = ra.trim().parse().context("Bad RA")?;
    let dec: f64 = dec.trim().parse().context("Bad DEC")?;
    if !(0.0..=360.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
        bail!("Target out of range: RA {ra}, DEC {dec}");
    }
    Ok(CelestialPoint::new(ra, dec))
}

fn spawn_printer(bus: &EventBus, dry_run: bool) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => render(&event, dry_run),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("(display fell behind, {skipped} events skipped)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn render(event: &TriageEvent, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    match event {
        TriageEvent::ScanStarted { total, .. } => {
            println!("Scanning {total} files...");
        }
        TriageEvent::ScanProgress { current, total, .. } => {
            if current % 25 == 0 && current != total {
                println!("  scanned {current}/{total}");
            }
        }
        TriageEvent::ScanCompleted {
            sessions,
            ungrouped,
            ..
        } => {
            println!("Detected {} session(s):", sessions.len());
            for s in sessions {
                let flag = if s.frame_count < FEW_FRAMES_THRESHOLD {
                    " (few frames)"
                } else {
                    ""
                };
                println!(
                    "  Session {}: {} frames at RA {:.4} / DEC {:.4}{}",
                    s.id, s.frame_count, s.ra, s.dec, flag
                );
            }
            if *ungrouped > 0 {
                println!("  {ungrouped} frame(s) without usable coordinates");
            }
        }
        TriageEvent::RunStarted { frames, .. } => {
            println!("{prefix}Triaging {frames} frames...");
        }
        TriageEvent::FrameCompleted {
            path,
            verdict,
            message,
            ..
        } => {
            let tag = match verdict {
                Verdict::Accepted => "ACCEPT",
                Verdict::Rejected(_) => "REJECT",
                Verdict::Errored => "ERROR ",
            };
            println!("{prefix}{tag} {path} | {message}");
        }
        TriageEvent::StatsSnapshot { snapshot, .. } => {
            let fwhm = match (snapshot.fwhm_mean, snapshot.fwhm_std_dev) {
                (Some(m), Some(sd)) => {
                    format!("FWHM {m:.2} +/- {sd:.2} ({} elite)", snapshot.elite_count)
                }
                _ => "FWHM n/a".to_string(),
            };
            let roundness = match (snapshot.roundness_mean, snapshot.roundness_min) {
                (Some(m), Some(min)) => format!("R {m:.3} (min {min:.3})"),
                _ => "R n/a".to_string(),
            };
            println!(
                "{prefix}stats: {} ok / {} rejected / {} errors | {fwhm} | {roundness}",
                snapshot.accepted, snapshot.rejected, snapshot.errored
            );
        }
        TriageEvent::RunCompleted {
            accepted,
            rejected,
            errored,
            duration_seconds,
            ..
        } => {
            println!(
                "{prefix}Done in {duration_seconds}s: {accepted} accepted, {rejected} rejected, {errored} errored"
            );
        }
        TriageEvent::RunCancelled { processed, .. } => {
            println!("{prefix}Cancelled after {processed} frame(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_degrees() {
        let coord = parse_target("83.822, -5.391").unwrap();
        assert!((coord.ra - 83.822).abs() < 1e-9);
        assert!((coord.dec + 5.391).abs() < 1e-9);
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(parse_target("M42").is_err());
        assert!(parse_target("400,0").is_err());
        assert!(parse_target("10,95").is_err());
    }
}
