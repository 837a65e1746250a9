//! Plate solving via the external ASTAP binary
//!
//! ASTAP is invoked per frame with a bounded wall clock. On success it
//! writes a `.wcs` sidecar next to the frame; the solved center is read from
//! its CRVAL1/CRVAL2 cards. All sidecar litter is removed afterwards so the
//! input folder stays clean.

use async_trait::async_trait;
use fitsort_common::CelestialPoint;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("Failed to launch solver {0}: {1}")]
    Spawn(PathBuf, #[source] std::io::Error),

    #[error("Solver did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Solver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unparseable solve result: {0}")]
    Parse(String),
}

/// Seam over the astrometric solver so the pipeline and its tests never
/// depend on an installed binary.
#[async_trait]
pub trait PlateSolver: Send + Sync {
    /// Solve one frame. `Ok(None)` means the solver ran but found no
    /// solution (blind field, clouds).
    async fn solve(&self, frame: &Path) -> Result<Option<CelestialPoint>, SolveError>;
}

pub struct AstapSolver {
    astap_path: PathBuf,
    /// Star database directory; when None, ASTAP uses the database next to
    /// its executable.
    db_path: Option<PathBuf>,
    timeout: Duration,
}

impl AstapSolver {
    pub fn new(astap_path: PathBuf, db_path: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            astap_path,
            db_path,
            timeout,
        }
    }
}

#[async_trait]
impl PlateSolver for AstapSolver {
    async fn solve(&self, frame: &Path) -> Result<Option<CelestialPoint>, SolveError> {
        let mut cmd = Command::new(&self.astap_path);
        cmd.arg("-f").arg(frame).arg("-r").arg("30");
        if let Some(db) = &self.db_path {
            cmd.arg("-d").arg(db);
        }
        let mut child = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SolveError::Spawn(self.astap_path.clone(), e))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // ASTAP signals "no solution" through the missing sidecar,
                // not the exit code; only log the status.
                tracing::debug!(file = %frame.display(), %status, "Solver finished");
            }
            Ok(Err(e)) => {
                cleanup_sidecars(frame);
                return Err(SolveError::Io(e));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill stuck solver");
                }
                cleanup_sidecars(frame);
                return Err(SolveError::Timeout(self.timeout));
            }
        }

        let wcs_path = frame.with_extension("wcs");
        let result = if wcs_path.exists() {
            let content = std::fs::read_to_string(&wcs_path)?;
            Some(parse_wcs_center(&content)?)
        } else {
            None
        };
        cleanup_sidecars(frame);
        Ok(result)
    }
}

/// Extract the solved field center (CRVAL1 = RA, CRVAL2 = DEC) from a WCS
/// sidecar, which holds FITS-style `KEY = value / comment` cards.
fn parse_wcs_center(content: &str) -> Result<CelestialPoint, SolveError> {
    let ra = wcs_card_value(content, "CRVAL1")
        .ok_or_else(|| SolveError::Parse("missing CRVAL1".into()))?;
    let dec = wcs_card_value(content, "CRVAL2")
        .ok_or_else(|| SolveError::Parse("missing CRVAL2".into()))?;
    Ok(CelestialPoint::new(ra, dec))
}

fn wcs_card_value(content: &str, keyword: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let (name, rest) = line.split_once('=')?;
        if name.trim() != keyword {
            return None;
        }
        rest.split('/').next()?.trim().parse::<f64>().ok()
    })
}

/// Remove solver droppings: the per-frame `.wcs` and `.ini` sidecars and
/// the shared `astap.ini` in the frame's folder.
fn cleanup_sidecars(frame: &Path) {
    let mut litter = vec![frame.with_extension("wcs"), frame.with_extension("ini")];
    if let Some(parent) = frame.parent() {
        litter.push(parent.join("astap.ini"));
    }
    for path in litter {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(file = %path.display(), error = %e, "Failed to remove solver sidecar");
            }
        }
    }
}
