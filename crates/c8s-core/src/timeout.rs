//! Duration string parsing for step/pipeline timeouts.
//!
//! Accepts `<int>{s|m|h}`, e.g. `30m`, `1h`, `45s`. Used both to validate
//! config at plan time and to compute `activeDeadlineSeconds` for Jobs.

use crate::error::{Error, Result};

/// Parse a timeout string into seconds. Rejects empty input, a missing or
/// unknown unit suffix, a non-numeric magnitude, and negative values (the
/// grammar has no sign, so a malformed prefix is the only way to get one).
pub fn parse_timeout_seconds(input: &str) -> Result<u64> {
    if input.is_empty() {
        return Err(Error::InvalidTimeout("empty timeout".to_string()));
    }

    let (digits, unit) = input.split_at(input.len() - 1);
    if digits.is_empty() {
        return Err(Error::InvalidTimeout(format!(
            "missing magnitude in {input:?}"
        )));
    }

    let magnitude: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidTimeout(format!("invalid magnitude in {input:?}")))?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => {
            return Err(Error::InvalidTimeout(format!(
                "unknown unit {other:?} in {input:?}"
            )));
        }
    };

    Ok(magnitude * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_timeout_seconds("45s").unwrap(), 45);
        assert_eq!(parse_timeout_seconds("30m").unwrap(), 1800);
        assert_eq!(parse_timeout_seconds("1h").unwrap(), 3600);
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_timeout_seconds("").is_err());
    }

    #[test]
    fn rejects_missing_unit() {
        assert!(parse_timeout_seconds("30").is_err());
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_timeout_seconds("30d").is_err());
    }

    #[test]
    fn rejects_non_numeric_magnitude() {
        assert!(parse_timeout_seconds("xm").is_err());
        assert!(parse_timeout_seconds("-5m").is_err());
    }
}
