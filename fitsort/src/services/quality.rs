//! Frame quality analysis via the external star-metrics binary
//!
//! The analyzer is a separate executable that detects stars in one frame
//! and writes its measurements as JSON to a path we supply. Keeping it out
//! of process isolates its native image libraries from the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Analyzer binary not found at {0}")]
    BinaryNotFound(PathBuf),

    #[error("Analyzer execution failed: {0}")]
    Execution(String),

    #[error("Analyzer reported failure: {0}")]
    Failed(String),

    #[error("Failed to parse analyzer output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which optional measurements to request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzerOptions {
    pub check_fwhm: bool,
    pub check_aberration: bool,
    pub check_seeing: bool,
}

/// Star metrics for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    /// Stars detected in the frame
    pub star_count: u32,
    /// Mean star roundness, 1.0 = perfectly round
    pub roundness: f64,
    /// Mean full width at half maximum, pixels
    #[serde(default)]
    pub fwhm: f64,
    /// Seeing estimate, arcseconds (0 when not requested)
    #[serde(default)]
    pub seeing: f64,
    /// Corner aberration detected (false when not requested)
    #[serde(default)]
    pub has_aberration: bool,
    #[serde(default)]
    pub sky_background: f64,
    #[serde(default)]
    pub snr: f64,
}

/// Seam over the analyzer binary for the pipeline and tests.
#[async_trait]
pub trait QualityAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        frame: &Path,
        options: AnalyzerOptions,
    ) -> Result<QualityReport, AnalyzerError>;
}

pub struct AnalyzerCommand {
    binary_path: PathBuf,
}

impl AnalyzerCommand {
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Check the binary exists before a run starts, so a bad path fails
    /// fast instead of erroring every frame.
    pub fn is_available(&self) -> bool {
        self.binary_path.exists() || which(&self.binary_path)
    }
}

/// Bare command name: assume PATH lookup will find it.
fn which(path: &Path) -> bool {
    path.components().count() == 1
}

#[async_trait]
impl QualityAnalyzer for AnalyzerCommand {
    async fn analyze(
        &self,
        frame: &Path,
        options: AnalyzerOptions,
    ) -> Result<QualityReport, AnalyzerError> {
        let output_path =
            std::env::temp_dir().join(format!("fitsort_quality_{}.json", Uuid::new_v4()));

        let mut cmd = Command::new(&self.binary_path);
        cmd.arg(frame).arg("--output").arg(&output_path);
        if options.check_fwhm {
            cmd.arg("--fwhm");
        }
        if options.check_aberration {
            cmd.arg("--aberration");
        }
        if options.check_seeing {
            cmd.arg("--seeing");
        }

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AnalyzerError::BinaryNotFound(self.binary_path.clone())
            } else {
                AnalyzerError::Execution(e.to_string())
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = std::fs::remove_file(&output_path);
            return Err(AnalyzerError::Failed(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let json = std::fs::read_to_string(&output_path)?;
        let report = parse_report(&json);
        let _ = std::fs::remove_file(&output_path);
        report
    }
}

fn parse_report(json: &str) -> Result<QualityReport, AnalyzerError> {
    serde_json::from_str(json).map_err(|e| AnalyzerError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_report() {
        let json = r#"{
            "starCount": 312,
            "roundness": 0.91,
            "fwhm": 2.41,
            "seeing": 1.8,
            "hasAberration": false,
            "skyBackground": 412.5,
            "snr": 38.2
        }"#;
        let report = parse_report(json).unwrap();
        assert_eq!(report.star_count, 312);
        assert!((report.roundness - 0.91).abs() < 1e-9);
        assert!((report.fwhm - 2.41).abs() < 1e-9);
        assert!(!report.has_aberration);
    }

    #[test]
    fn test_parse_minimal_report_uses_defaults() {
        let json = r#"{"starCount": 45, "roundness": 0.85}"#;
        let report = parse_report(json).unwrap();
        assert_eq!(report.star_count, 45);
        assert_eq!(report.fwhm, 0.0);
        assert!(!report.has_aberration);
    }

    #[test]
    fn test_parse_garbage_is_an_error() {
        assert!(matches!(
            parse_report("not json"),
            Err(AnalyzerError::Parse(_))
        ));
    }

    #[test]
    fn test_bare_command_name_counts_as_available() {
        assert!(AnalyzerCommand::new(PathBuf::from("star-metrics")).is_available());
        assert!(!AnalyzerCommand::new(PathBuf::from("/no/such/analyzer")).is_available());
    }
}
