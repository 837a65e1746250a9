//! Verdict-driven file routing
//!
//! Accepted frames of a session move into that session's folder; rejects
//! move into reason-specific subfolders so a bad night can be reviewed at a
//! glance. Frames are renamed, never copied.

use fitsort_common::events::{RejectReason, Verdict};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SESSION_DIR_PREFIX: &str = "Session_";
pub const REJECTED_DIR: &str = "Rejected";
pub const GEOMETRY_ERROR_DIR: &str = "GeometryError";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Failed to create {dir}: {source}")]
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to move {file} to {dest}: {source}")]
    Move {
        file: PathBuf,
        dest: PathBuf,
        source: std::io::Error,
    },
}

pub struct FrameRouter {
    root: PathBuf,
}

impl FrameRouter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn session_dir(&self, session_id: u32) -> PathBuf {
        self.root.join(format!("{SESSION_DIR_PREFIX}{session_id}"))
    }

    /// Destination folder for a verdict, or None when the frame stays put.
    ///
    /// Rejects land under the assigned session folder when there is one,
    /// under the root otherwise. Accepted frames move only in session mode;
    /// in single target mode acceptance leaves the file in place. Errored
    /// frames are never moved.
    pub fn destination(
        &self,
        verdict: &Verdict,
        cluster_id: Option<u32>,
        session_mode: bool,
    ) -> Option<PathBuf> {
        let base = match cluster_id {
            Some(id) if session_mode => self.session_dir(id),
            _ => self.root.clone(),
        };
        match verdict {
            Verdict::Accepted => {
                if session_mode && cluster_id.is_some() {
                    Some(base)
                } else {
                    None
                }
            }
            Verdict::Rejected(RejectReason::FalseHeader) => Some(base.join(GEOMETRY_ERROR_DIR)),
            Verdict::Rejected(_) => Some(base.join(REJECTED_DIR)),
            Verdict::Errored => None,
        }
    }

    /// Move a frame into `dest_dir`, creating the folder if needed.
    ///
    /// One retry on failure covers the transient cases (folder scanned by
    /// another program, slow network share) before the caller downgrades
    /// the frame to an error.
    pub fn route(&self, frame: &Path, dest_dir: &Path) -> Result<(), RouteError> {
        std::fs::create_dir_all(dest_dir).map_err(|source| RouteError::CreateDir {
            dir: dest_dir.to_path_buf(),
            source,
        })?;

        let file_name = frame.file_name().unwrap_or(frame.as_os_str());
        let dest = dest_dir.join(file_name);

        if let Err(first) = std::fs::rename(frame, &dest) {
            tracing::warn!(
                file = %frame.display(),
                error = %first,
                "Move failed, retrying once"
            );
            std::fs::rename(frame, &dest).map_err(|source| RouteError::Move {
                file: frame.to_path_buf(),
                dest,
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> FrameRouter {
        FrameRouter::new(PathBuf::from("/data/night1"))
    }

    #[test]
    fn test_accepted_session_frame_goes_to_session_dir() {
        let dest = router().destination(&Verdict::Accepted, Some(2), true);
        assert_eq!(dest, Some(PathBuf::from("/data/night1/Session_2")));
    }

    #[test]
    fn test_accepted_single_target_frame_stays_put() {
        assert_eq!(router().destination(&Verdict::Accepted, None, false), None);
    }

    #[test]
    fn test_false_header_goes_to_geometry_error() {
        let dest = router().destination(
            &Verdict::Rejected(RejectReason::FalseHeader),
            Some(1),
            true,
        );
        assert_eq!(
            dest,
            Some(PathBuf::from("/data/night1/Session_1/GeometryError"))
        );
    }

    #[test]
    fn test_quality_reject_without_cluster_goes_under_root() {
        let dest = router().destination(
            &Verdict::Rejected(RejectReason::InsufficientStars),
            None,
            false,
        );
        assert_eq!(dest, Some(PathBuf::from("/data/night1/Rejected")));
    }

    #[test]
    fn test_errored_frame_is_never_moved() {
        assert_eq!(router().destination(&Verdict::Errored, Some(1), true), None);
    }

    #[test]
    fn test_route_moves_file_and_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("light.fits");
        std::fs::write(&frame, b"data").unwrap();
        let router = FrameRouter::new(dir.path().to_path_buf());

        let dest_dir = router.session_dir(1);
        router.route(&frame, &dest_dir).unwrap();

        assert!(!frame.exists());
        assert!(dest_dir.join("light.fits").exists());

        // Routing into the same folder again must not trip over the
        // existing directory.
        let frame2 = dir.path().join("light2.fits");
        std::fs::write(&frame2, b"data").unwrap();
        router.route(&frame2, &dest_dir).unwrap();
        assert!(dest_dir.join("light2.fits").exists());
    }

    #[test]
    fn test_route_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = FrameRouter::new(dir.path().to_path_buf());
        let err = router
            .route(&dir.path().join("ghost.fits"), &dir.path().join("Rejected"))
            .unwrap_err();
        assert!(matches!(err, RouteError::Move { .. }));
    }
}
