//! Parsers for duration and memory-size configuration values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Parses durations such as `500ms`, `30s`, `5m`, `1h30m`.
///
/// A bare integer is read as seconds. Returns `None` for empty input, unknown
/// units, or overflow.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return trimmed.parse::<u64>().ok().map(Duration::from_secs);
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|character: char| !character.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, after_digits) = rest.split_at(digits_end);
        let amount = digits.parse::<u64>().ok()?;

        let unit_end = after_digits
            .find(|character: char| character.is_ascii_digit())
            .unwrap_or(after_digits.len());
        let (unit, remainder) = after_digits.split_at(unit_end);

        let component = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3_600)?),
            _ => return None,
        };
        total = total.checked_add(component)?;
        rest = remainder;
    }

    Some(total)
}

/// Memory limit above which a container should be refreshed.
///
/// The value is parsed and kept on the service definition, but nothing
/// enforces it: there is no container statistics source to compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryThreshold(u64);

impl MemoryThreshold {
    /// Parses sizes such as `512mb`, `1g`, `2048k`, or a bare byte count.
    ///
    /// Units are binary multiples and case-insensitive.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let digits_end = normalized
            .find(|character: char| !character.is_ascii_digit())
            .unwrap_or(normalized.len());
        let (digits, unit) = normalized.split_at(digits_end);
        let amount = digits.parse::<u64>().ok()?;

        let multiplier: u64 = match unit.trim() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => 1 << 10,
            "m" | "mb" | "mib" => 1 << 20,
            "g" | "gb" | "gib" => 1 << 30,
            _ => return None,
        };

        amount.checked_mul(multiplier).map(Self)
    }

    /// Returns the threshold in bytes.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemoryThreshold {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} bytes", self.0)
    }
}
