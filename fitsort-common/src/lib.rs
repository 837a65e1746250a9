//! # fitsort Common Library
//!
//! Shared code for the fitsort workspace:
//! - Celestial coordinate type and angular distance
//! - Event types (TriageEvent enum) and the EventBus
//! - Configuration file and tool path resolution
//! - Common error type

pub mod config;
pub mod coords;
pub mod error;
pub mod events;

pub use coords::CelestialPoint;
pub use error::{Error, Result};
pub use events::EventBus;
