//! Date parsing for envelope and keyring timestamps.
//!
//! Dates travel as ISO 8601 strings. An explicit offset is honoured; a date
//! without one is read as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use crate::error::{CoreError, Result};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO 8601 date string.
pub fn parse_date(s: &str) -> Result<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = day.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().fixed_offset());
        }
    }
    Err(CoreError::InvalidDate(s.to_owned()))
}

/// Current wall-clock time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_offset() {
        let dt = parse_date("2017-04-20T01:55:21.358240+03:00").unwrap();
        assert_eq!(dt.with_timezone(&Utc).to_rfc3339(), "2017-04-19T22:55:21.358240+00:00");
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let a = parse_date("2020-01-01T00:00:00").unwrap();
        let b = parse_date("2020-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(parse_date("2020-01-01").unwrap(), b);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_date("yesterday"), Err(CoreError::InvalidDate(_))));
        assert!(parse_date("").is_err());
    }
}
