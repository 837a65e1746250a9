//! fitsort library interface
//!
//! Exposes the pipeline and its services for integration testing and
//! embedding. The `fitsort` binary is a thin CLI over this crate.

pub mod config;
pub mod pipeline;
pub mod services;
pub mod types;

pub use crate::config::TriageConfig;
pub use crate::pipeline::{RunReport, TargetMode, TriagePipeline};
pub use crate::types::FrameInfo;
