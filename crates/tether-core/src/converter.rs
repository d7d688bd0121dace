//! Human-readable size conversion (`4.5M` -> 4718592).
//!
//! Units are powers of 1024. Fractional values are converted with integer
//! arithmetic so `4.5M` is exact; anything finer than one byte is truncated.

use std::sync::OnceLock;

use regex::Regex;

use crate::{ObserverError, Result};

const UNITS: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

fn size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+)(?:[.,](\d+))?\s*([KMGTPE])?(?:i?B)?\s*$")
            .expect("Invalid size regex")
    })
}

/// Converts a size token to a byte count.
///
/// Accepts an optional unit suffix (`K`, `M`, `G`, `T`, `P`, `E`, case
/// insensitive, optionally followed by `B` or `iB`).
pub fn to_bytes(token: &str) -> Result<u64> {
    let invalid = || ObserverError::InvalidSize(token.to_string());
    let caps = size_regex().captures(token).ok_or_else(invalid)?;

    let exponent = caps
        .get(3)
        .and_then(|m| m.as_str().chars().next())
        .and_then(|unit| UNITS.iter().position(|u| u.eq_ignore_ascii_case(&unit)))
        .map(|index| index as u32 + 1)
        .unwrap_or(0);
    let multiplier = 1024u128.pow(exponent);

    let whole: u128 = caps[1].parse().map_err(|_| invalid())?;
    let mut bytes = whole.checked_mul(multiplier).ok_or_else(invalid)?;

    if let Some(fraction) = caps.get(2) {
        let digits = fraction.as_str().trim_end_matches('0');
        if !digits.is_empty() {
            if digits.len() > 30 {
                return Err(invalid());
            }
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            let denominator = 10u128.pow(digits.len() as u32);
            let part = numerator.checked_mul(multiplier).ok_or_else(invalid)? / denominator;
            bytes = bytes.checked_add(part).ok_or_else(invalid)?;
        }
    }

    u64::try_from(bytes).map_err(|_| invalid())
}
