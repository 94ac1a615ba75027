//! Kubernetes short-form durations (`30s`, `5m`, `1h`, `1d`).

use super::ConfigError;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").expect("Failed to compile duration regex")
});

/// Parse `<number><unit>` where unit is one of `s`, `m`, `h`, `d` (case insensitive)
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, ConfigError> {
    let trimmed = duration_str.trim();
    let lower = trimmed.to_lowercase();

    let captures = DURATION_REGEX
        .captures(&lower)
        .ok_or_else(|| ConfigError::InvalidDuration(trimmed.to_string()))?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|_| ConfigError::DurationOutOfRange(trimmed.to_string()))?;
    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(ConfigError::InvalidDuration(trimmed.to_string())),
    };

    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::DurationOutOfRange(trimmed.to_string()))
}
