//! Pipeline services

pub mod clusterer;
pub mod header;
pub mod plate_solver;
pub mod quality;
pub mod router;
pub mod scanner;
pub mod sesame;
pub mod stats;
pub mod verification;
