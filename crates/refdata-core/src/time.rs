//! Millisecond timestamps and duration strings.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{CoreError, CoreResult};

/// Parse an RFC 3339 timestamp (e.g. `2010-01-01T09:47:00.111Z`) into
/// milliseconds since the Unix epoch.
pub fn parse_instant_ms(s: &str) -> CoreResult<i64> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| CoreError::InvalidTimestamp(format!("{s}: {e}")))
}

/// Render epoch milliseconds as an RFC 3339 UTC string.
pub fn format_instant_ms(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => format!("{ms}ms"),
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Parse a duration string like "500ms", "60s", "10m", "12h", "30d".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::InvalidDuration(s.to_string());
    let (digits, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400_000)
    } else {
        (s, 1_000)
    };
    let count: u64 = digits.trim().parse().map_err(|_| invalid())?;
    count
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_instant_with_millis() {
        let ms = parse_instant_ms("2010-01-01T09:47:00.111Z").unwrap();
        assert_eq!(ms % 1000, 111);
        assert_eq!(format_instant_ms(ms), "2010-01-01T09:47:00.111Z");
    }

    #[test]
    fn parse_instant_rejects_garbage() {
        assert!(matches!(
            parse_instant_ms("yesterday"),
            Err(CoreError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn instants_order_chronologically() {
        let a = parse_instant_ms("2008-01-01T09:47:00Z").unwrap();
        let b = parse_instant_ms("2009-01-01T09:47:00Z").unwrap();
        assert!(a < b);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * 86_400));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn parse_duration_rejects_unknown_units() {
        assert!(parse_duration("5 weeks").is_err());
        assert!(parse_duration("").is_err());
    }
}
