use chrono::{DateTime, Utc};

/// Current wall-clock time as milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 / ISO 8601 timestamp into epoch milliseconds.
pub fn parse_iso_ms(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .ok()
}

/// Render epoch milliseconds as an RFC 3339 timestamp (UTC).
pub fn to_iso(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap())
        .to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_round_trip() {
        let ms = 1_700_000_000_123;
        let iso = to_iso(ms);
        assert_eq!(parse_iso_ms(&iso), Some(ms));
    }

    #[test]
    fn test_parse_iso_rejects_garbage() {
        assert_eq!(parse_iso_ms("not a timestamp"), None);
        assert_eq!(parse_iso_ms("last_tuesday"), None);
    }
}
