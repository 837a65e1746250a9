//! Celestial coordinates and small-angle distance
//!
//! All coordinates are J2000 right ascension / declination in decimal
//! degrees. Distances use the flat-sky approximation
//! `sqrt((dRA * cos(dec))^2 + dDec^2)`, which is accurate at the sub-degree
//! separations this pipeline cares about (session radii and dither offsets)
//! and cheap enough to evaluate against every cluster centroid per frame.

use serde::{Deserialize, Serialize};

/// A point on the celestial sphere, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CelestialPoint {
    /// Right ascension in degrees (0..360)
    pub ra: f64,
    /// Declination in degrees (-90..+90)
    pub dec: f64,
}

impl CelestialPoint {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Angular separation from `other` in degrees.
    ///
    /// Flat-sky approximation with the RA axis compressed by the cosine of
    /// this point's declination.
    pub fn separation_deg(&self, other: &CelestialPoint) -> f64 {
        let d_ra = (self.ra - other.ra) * self.dec.to_radians().cos();
        let d_dec = self.dec - other.dec;
        (d_ra * d_ra + d_dec * d_dec).sqrt()
    }

    /// Angular separation from `other` in arcseconds.
    pub fn separation_arcsec(&self, other: &CelestialPoint) -> f64 {
        self.separation_deg(other) * 3600.0
    }
}

impl std::fmt::Display for CelestialPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RA {:.4} / DEC {:.4}", self.ra, self.dec)
    }
}
