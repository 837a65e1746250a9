//! Core frame types

use fitsort_common::CelestialPoint;
use std::path::PathBuf;

/// One exposure file under evaluation.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Path to the exposure file
    pub path: PathBuf,
    /// Pointing as reported by the file header (may be absent or a lie)
    pub header_coord: Option<CelestialPoint>,
    /// Coordinate the pipeline currently trusts. Starts as the header value
    /// and is overwritten by a verified plate solve.
    pub working_coord: Option<CelestialPoint>,
    /// Final cluster this frame belongs to, assigned after the merge pass.
    /// None for frames without valid coordinates.
    pub cluster_id: Option<u32>,
}

impl FrameInfo {
    pub fn new(path: PathBuf, header_coord: Option<CelestialPoint>) -> Self {
        Self {
            path,
            header_coord,
            working_coord: header_coord,
            cluster_id: None,
        }
    }

    /// File name for log lines and outcome events
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
