//! Decimal <-> tag string codec.
//!
//! The store only carries strings and unsigned integers in tags, so prices and
//! amounts travel as text. Values are written in the shortest scientific form
//! that parses back to the identical `f64` (`1.0001e0`, `-3.5e-7`), which makes
//! the round trip lossless for every finite value. Precision is therefore that
//! of the `f64` the transform produced; no additional rounding is applied.
//! Non-finite values are refused on both sides.

use anyhow::{Result, anyhow};

pub fn encode_decimal(value: f64) -> Option<String> {
    value.is_finite().then(|| format!("{value:e}"))
}

pub fn decode_decimal(raw: &str) -> Result<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid decimal tag '{raw}': {e}"))?;
    if !value.is_finite() {
        return Err(anyhow!("non-finite decimal tag '{raw}'"));
    }
    Ok(value)
}

pub fn encode_tick(tick: i32) -> String {
    tick.to_string()
}

pub fn decode_tick(raw: &str) -> Result<i32> {
    raw.trim().parse().map_err(|e| anyhow!("invalid tick tag '{raw}': {e}"))
}
