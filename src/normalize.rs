// src/normalize.rs
//! Raw page strings -> per-unit numeric rates.

use crate::model::RawQuote;
use crate::scrape::ScrapeError;

/// Cleaned numeric buy/sell, already divided by the source's unit factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub buy: f64,
    pub sell: f64,
}

/// Trim, treat ',' as the decimal point, drop everything that is neither a
/// digit nor '.', then parse.
pub fn clean_rate(raw: &str) -> String {
    raw.trim()
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

fn parse_positive(raw: &str) -> Result<f64, ScrapeError> {
    let cleaned = clean_rate(raw);
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ScrapeError::ParseFailed(format!("not a positive rate: {raw:?}"))),
    }
}

/// Normalize a scraped pair. `units > 1` scales to per-1-unit rates.
pub fn normalize(raw: &RawQuote, units: i32) -> Result<Rates, ScrapeError> {
    let mut buy = parse_positive(&raw.buy)?;
    let mut sell = parse_positive(&raw.sell)?;
    if units > 1 {
        buy /= f64::from(units);
        sell /= f64::from(units);
    }
    Ok(Rates { buy, sell })
}
