//! Token unit conversions.
//!
//! Amounts travel as `u128` base units; users type and read decimal text.

use crate::{Result, StakingError};

/// Decimals of the CTSI token.
pub const CTSI_DECIMALS: u32 = 18;

/// 1 finney = 10^15 wei.
pub const FINNEY: u128 = 1_000_000_000_000_000;

/// Parse decimal text (e.g. "1.5") into base units with `decimals` places.
pub fn parse_units(text: &str, decimals: u32) -> Result<u128> {
    let text = text.trim();
    let invalid = || StakingError::InvalidAmount(text.to_string());

    if text.is_empty() || text.starts_with('-') || text.starts_with('+') {
        return Err(invalid());
    }

    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    // Trailing zeros past the last representable place are harmless.
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.len() > decimals as usize {
        return Err(StakingError::InvalidAmount(format!(
            "{} has more than {} decimals",
            text, decimals
        )));
    }

    let digits = format!("{}{:0<width$}", int_part, frac_part, width = decimals as usize);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits.parse::<u128>().map_err(|_| invalid())
}

/// Format base units as decimal text, ethers style ("1.0", "0.25").
pub fn format_units(amount: u128, decimals: u32) -> String {
    let decimals = decimals as usize;
    let digits = amount.to_string();
    let padded = if digits.len() <= decimals {
        format!("{:0>width$}", digits, width = decimals + 1)
    } else {
        digits
    };
    let split = padded.len() - decimals;
    let (int_part, frac_part) = padded.split_at(split);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        format!("{}.0", int_part)
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

pub fn parse_ctsi(text: &str) -> Result<u128> {
    parse_units(text, CTSI_DECIMALS)
}

pub fn format_ctsi(amount: u128) -> String {
    format_units(amount, CTSI_DECIMALS)
}

/// Compact notation with at most two fraction digits ("1.5K", "2.35M").
pub fn format_compact(amount: u128, decimals: u32) -> String {
    const SUFFIXES: [&str; 5] = ["", "K", "M", "B", "T"];

    let mut value: f64 = format_units(amount, decimals).parse().unwrap_or(0.0);
    let mut tier = 0;
    while value >= 1000.0 && tier + 1 < SUFFIXES.len() {
        value /= 1000.0;
        tier += 1;
    }
    let mut rounded = (value * 100.0).round() / 100.0;
    if rounded >= 1000.0 && tier + 1 < SUFFIXES.len() {
        rounded = (rounded / 1000.0 * 100.0).round() / 100.0;
        tier += 1;
    }

    let text = format!("{:.2}", rounded);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", text, SUFFIXES[tier])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_parse_ctsi() {
        assert_eq!(parse_ctsi("1").unwrap(), ONE);
        assert_eq!(parse_ctsi("1.5").unwrap(), ONE + ONE / 2);
        assert_eq!(parse_ctsi(".25").unwrap(), ONE / 4);
        assert_eq!(parse_ctsi("0").unwrap(), 0);
        assert_eq!(parse_ctsi("1.500000000000000000000").unwrap(), ONE + ONE / 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", ".", "-1", "1e18", "abc", "1.2.3", "0.0000000000000000001"] {
            assert!(parse_ctsi(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_ctsi("1000000000000000000000").is_err());
    }

    #[test]
    fn test_format_ctsi() {
        assert_eq!(format_ctsi(ONE), "1.0");
        assert_eq!(format_ctsi(ONE + ONE / 2), "1.5");
        assert_eq!(format_ctsi(0), "0.0");
        assert_eq!(format_ctsi(1), "0.000000000000000001");
        assert_eq!(format_units(12345, 2), "123.45");
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_compact(999 * ONE, 18), "999");
        assert_eq!(format_compact(1_500 * ONE, 18), "1.5K");
        assert_eq!(format_compact(2_350_000 * ONE, 18), "2.35M");
        assert_eq!(format_compact(999_999 * ONE, 18), "1M");
        assert_eq!(format_compact(ONE / 8, 18), "0.13");
        assert_eq!(format_compact(0, 18), "0");
    }

    #[test]
    fn test_finney() {
        assert_eq!(parse_units("1", 15).unwrap(), FINNEY);
        assert_eq!(format_ctsi(FINNEY), "0.001");
    }
}
