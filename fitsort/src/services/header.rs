//! FITS header coordinate extraction
//!
//! Reads only the primary header (2880-byte blocks of 80-byte ASCII cards)
//! to pull out the pointing keywords. No image data is touched, so scanning
//! a folder of multi-megabyte exposures stays fast.

use fitsort_common::CelestialPoint;
use std::io::Read;
use std::path::Path;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
/// Headers longer than this are not exposures we care about.
const MAX_HEADER_BLOCKS: usize = 16;

/// Seam for header access so tests can feed synthetic pointings without
/// writing FITS files.
pub trait HeaderReader: Send + Sync {
    /// Pointing recorded in the frame header, or None when the keywords are
    /// missing, unparseable, or out of range.
    fn read_coordinate(&self, frame: &Path) -> Option<CelestialPoint>;
}

/// Reads real FITS primary headers from disk.
pub struct FitsHeaderReader;

impl HeaderReader for FitsHeaderReader {
    fn read_coordinate(&self, frame: &Path) -> Option<CelestialPoint> {
        let cards = match read_header_cards(frame) {
            Ok(cards) => cards,
            Err(e) => {
                tracing::warn!(file = %frame.display(), error = %e, "Failed to read header");
                return None;
            }
        };

        // RA is sometimes only present under the legacy OBJCTRA keyword.
        let ra = keyword_value(&cards, "RA").or_else(|| keyword_value(&cards, "OBJCTRA"))?;
        let dec = keyword_value(&cards, "DEC").or_else(|| keyword_value(&cards, "OBJCTDEC"))?;

        if !(0.0..=360.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
            tracing::warn!(file = %frame.display(), ra, dec, "Header coordinates out of range");
            return None;
        }
        Some(CelestialPoint::new(ra, dec))
    }
}

fn read_header_cards(frame: &Path) -> std::io::Result<Vec<String>> {
    let mut file = std::fs::File::open(frame)?;
    let mut cards = Vec::new();
    let mut block = [0u8; BLOCK_SIZE];

    for _ in 0..MAX_HEADER_BLOCKS {
        file.read_exact(&mut block)?;
        for card in block.chunks(CARD_SIZE) {
            let text = String::from_utf8_lossy(card).into_owned();
            if text.starts_with("END") && text[3..].trim().is_empty() {
                return Ok(cards);
            }
            cards.push(text);
        }
    }
    Ok(cards)
}

/// Numeric value of a header card, `KEYWORD = value / comment`.
///
/// Returns None for absent keywords and for values that are not plain
/// numbers (sexagesimal strings like `'06 30 57'` are deliberately not
/// interpreted).
fn keyword_value(cards: &[String], keyword: &str) -> Option<f64> {
    cards.iter().find_map(|card| {
        let (name, rest) = card.split_at(8.min(card.len()));
        if name.trim() != keyword {
            return None;
        }
        let value = rest.strip_prefix('=')?;
        let value = value.split('/').next().unwrap_or(value).trim();
        value.parse::<f64>().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn card(text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(CARD_SIZE, b' ');
        bytes
    }

    fn write_fits_header(path: &Path, cards: &[&str]) {
        let mut block = Vec::new();
        for c in cards {
            block.extend(card(c));
        }
        block.extend(card("END"));
        block.resize(BLOCK_SIZE, b' ');
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(&block).unwrap();
    }

    #[test]
    fn test_reads_ra_dec_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.fits");
        write_fits_header(
            &path,
            &[
                "SIMPLE  =                    T",
                "BITPIX  =                   16",
                "RA      =             10.68458 / pointing",
                "DEC     =             41.26917",
            ],
        );

        let coord = FitsHeaderReader.read_coordinate(&path).unwrap();
        assert!((coord.ra - 10.68458).abs() < 1e-9);
        assert!((coord.dec - 41.26917).abs() < 1e-9);
    }

    #[test]
    fn test_falls_back_to_objct_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("light.fits");
        write_fits_header(
            &path,
            &["OBJCTRA =              83.8221", "OBJCTDEC=              -5.3911"],
        );

        let coord = FitsHeaderReader.read_coordinate(&path).unwrap();
        assert!((coord.ra - 83.8221).abs() < 1e-9);
        assert!((coord.dec + 5.3911).abs() < 1e-9);
    }

    #[test]
    fn test_missing_keywords_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dark.fits");
        write_fits_header(&path, &["SIMPLE  =                    T"]);
        assert!(FitsHeaderReader.read_coordinate(&path).is_none());
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fits");
        write_fits_header(
            &path,
            &["RA      =            400.00000", "DEC     =             10.00000"],
        );
        assert!(FitsHeaderReader.read_coordinate(&path).is_none());
    }

    #[test]
    fn test_sexagesimal_string_not_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sexa.fits");
        write_fits_header(
            &path,
            &["OBJCTRA = '06 30 57'", "DEC     =             10.00000"],
        );
        assert!(FitsHeaderReader.read_coordinate(&path).is_none());
    }

    #[test]
    fn test_truncated_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.fits");
        std::fs::write(&path, b"not a fits file").unwrap();
        assert!(FitsHeaderReader.read_coordinate(&path).is_none());
    }
}
