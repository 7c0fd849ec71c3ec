//! Prometheus-style duration strings.
//!
//! Configuration timings are written the way Alertmanager writes them:
//! `500ms`, `30s`, `5m`, `1h30m`, `7d`. A bare `0` is also accepted.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConfigError;

/// Whole duration: one or more `<number><unit>` terms, largest unit first.
static DURATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9]+(?:ms|s|m|h|d|w|y))+$").unwrap_or_else(|_| unreachable!())
});

/// A single `<number><unit>` term.
static TERM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+)(ms|s|m|h|d|w|y)").unwrap_or_else(|_| unreachable!()));

fn unit_millis(unit: &str) -> Option<(u64, u8)> {
    // (milliseconds, rank) where a higher rank must come first.
    match unit {
        "y" => Some((365 * 24 * 3_600_000, 7)),
        "w" => Some((7 * 24 * 3_600_000, 6)),
        "d" => Some((24 * 3_600_000, 5)),
        "h" => Some((3_600_000, 4)),
        "m" => Some((60_000, 3)),
        "s" => Some((1_000, 2)),
        "ms" => Some((1, 1)),
        _ => None,
    }
}

/// Parses a duration string.
///
/// # Errors
///
/// Returns `ConfigError::InvalidDuration` for empty input, unknown units,
/// units out of order or repeated, or values that overflow.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if !DURATION_REGEX.is_match(input) {
        return Err(invalid("expected terms like 30s, 5m or 1h30m"));
    }

    let mut total: u64 = 0;
    let mut last_rank = u8::MAX;
    for caps in TERM_REGEX.captures_iter(input) {
        let (unit_ms, rank) = unit_millis(&caps[2]).ok_or_else(|| invalid("unknown unit"))?;
        if rank >= last_rank {
            return Err(invalid("units must go from largest to smallest, each at most once"));
        }
        last_rank = rank;

        let n: u64 = caps[1].parse().map_err(|_| invalid("number too large"))?;
        let term = n.checked_mul(unit_ms).ok_or_else(|| invalid("duration overflows"))?;
        total = total
            .checked_add(term)
            .ok_or_else(|| invalid("duration overflows"))?;
    }

    Ok(Duration::from_millis(total))
}

/// Formats a duration in the same syntax [`parse_duration`] accepts.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let mut ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for unit in ["y", "w", "d", "h", "m", "s", "ms"] {
        if let Some((unit_ms, _)) = unit_millis(unit) {
            let n = ms / unit_ms;
            if n > 0 {
                out.push_str(&format!("{n}{unit}"));
                ms -= n * unit_ms;
            }
        }
    }
    out
}

/// Serde adapter for optional duration fields written as strings.
pub mod serde_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `Some(d)` as its string form and `None` as null.
    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional duration string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for required duration fields written as strings.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as its string form.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    /// Deserializes a duration string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
