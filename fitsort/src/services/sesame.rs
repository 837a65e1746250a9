//! Object name resolution through the CDS Sesame service
//!
//! Turns a catalog name ("M 42", "NGC 7000") into J2000 degrees so single
//! target mode can be driven by name instead of raw coordinates.

use fitsort_common::CelestialPoint;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://cdsweb.u-strasbg.fr/cgi-bin/nph-sesame/-ox?";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Empty object name")]
    EmptyName,

    #[error("Sesame request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct SesameClient {
    client: reqwest::Client,
    base_url: String,
}

impl SesameClient {
    pub fn new() -> Result<Self, ResolveError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(base_url: String) -> Result<Self, ResolveError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url,
        })
    }

    /// Resolve a name to J2000 degrees. `Ok(None)` means Sesame answered
    /// but knows no such object.
    pub async fn resolve(&self, name: &str) -> Result<Option<CelestialPoint>, ResolveError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }

        let url = format!("{}{}", self.base_url, urlencode(name));
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let coord = parse_sesame_response(&body);
        if coord.is_none() {
            tracing::info!(object = name, "Sesame found no coordinates");
        }
        Ok(coord)
    }
}

/// Pull `<jradeg>`/`<jdedeg>` out of the Sesame XML answer. A well formed
/// answer without them just means the object is unknown.
fn parse_sesame_response(xml: &str) -> Option<CelestialPoint> {
    let extract = |tag: &str| -> Option<f64> {
        // Tags are fixed ASCII words, the pattern always compiles.
        let re = Regex::new(&format!("<{tag}>([^<]+)</{tag}>")).ok()?;
        re.captures(xml)?.get(1)?.as_str().trim().parse::<f64>().ok()
    };
    Some(CelestialPoint::new(extract("jradeg")?, extract("jdedeg")?))
}

fn urlencode(name: &str) -> String {
    name.replace(' ', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ANSWER: &str = r#"<?xml version="1.0"?>
<Sesame>
  <Target option="x">
    <name>M 42</name>
    <Resolver name="S=Simbad">
      <jradeg>83.82208</jradeg>
      <jdedeg>-5.39111</jdedeg>
    </Resolver>
  </Target>
</Sesame>"#;

    #[test]
    fn test_parse_known_object() {
        let coord = parse_sesame_response(SAMPLE_ANSWER).unwrap();
        assert!((coord.ra - 83.82208).abs() < 1e-9);
        assert!((coord.dec + 5.39111).abs() < 1e-9);
    }

    #[test]
    fn test_parse_unknown_object() {
        let xml = "<Sesame><Target><name>xyzzy</name></Target></Sesame>";
        assert!(parse_sesame_response(xml).is_none());
    }

    #[test]
    fn test_spaces_are_encoded() {
        assert_eq!(urlencode("NGC 7000"), "NGC%207000");
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let client = SesameClient::with_base_url("http://127.0.0.1:1/".into()).unwrap();
        assert!(matches!(
            client.resolve("  ").await,
            Err(ResolveError::EmptyName)
        ));
    }
}
