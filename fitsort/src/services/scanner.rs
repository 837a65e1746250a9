//! Exposure file discovery

use crate::services::header::HeaderReader;
use crate::types::FrameInfo;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// File extensions treated as FITS exposures (case-insensitive).
const FITS_EXTENSIONS: &[&str] = &["fits", "fit", "fts"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Collect the FITS files directly under `root`, sorted by file name.
///
/// Sorting makes the downstream clustering deterministic for a given
/// directory content regardless of filesystem enumeration order.
pub fn discover_frames(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !root.exists() {
        return Err(ScanError::PathNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_fits_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    tracing::debug!(root = %root.display(), count = files.len(), "Discovered exposure files");
    Ok(files)
}

/// Read pointings for a file list without clustering. Used by single
/// target mode, where sessions are irrelevant.
pub fn read_headers(files: Vec<PathBuf>, reader: &dyn HeaderReader) -> Vec<FrameInfo> {
    files
        .into_iter()
        .map(|path| {
            let coord = reader.read_coordinate(&path);
            FrameInfo::new(path, coord)
        })
        .collect()
}

fn is_fits_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            FITS_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}
