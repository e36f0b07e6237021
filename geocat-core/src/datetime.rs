//! Instant and interval parsing for the `datetime` filter.
//!
//! Accepted instant forms: RFC 3339 (`2024-01-01T00:00:00Z`, with offset or
//! fractional seconds), a naive `YYYY-MM-DDTHH:MM:SS` taken as UTC, or a bare
//! date taken as midnight UTC.
//!
//! Accepted interval forms: a single instant, `start/end`, and half-open
//! `../end`, `start/..` (an empty side is also open).

use crate::error::{CoreError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parse a single instant.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(CoreError::invalid_datetime(format!(
        "'{s}' is not an RFC 3339 timestamp or date"
    )))
}

/// Inclusive time interval; `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DatetimeRange {
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self {
            start: Some(at),
            end: Some(at),
        }
    }

    pub fn between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        match (start, end) {
            (None, None) => Err(CoreError::invalid_datetime(
                "interval must be bounded on at least one side",
            )),
            (Some(s), Some(e)) if s > e => Err(CoreError::invalid_datetime(format!(
                "interval start {s} is after end {e}"
            ))),
            _ => Ok(Self { start, end }),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::invalid_datetime("empty datetime"));
        }
        match s.split_once('/') {
            None => Ok(Self::instant(parse_instant(s)?)),
            Some((start, end)) => {
                let start = parse_open_bound(start)?;
                let end = parse_open_bound(end)?;
                Self::between(start, end)
            }
        }
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *t >= s) && self.end.map_or(true, |e| *t <= e)
    }
}

fn parse_open_bound(s: &str) -> Result<Option<DateTime<Utc>>> {
    match s.trim() {
        "" | ".." => Ok(None),
        other => parse_instant(other).map(Some),
    }
}

impl FromStr for DatetimeRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DatetimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |v: &Option<DateTime<Utc>>| v.map_or_else(|| "..".to_string(), |t| t.to_rfc3339());
        if self.start.is_some() && self.start == self.end {
            write!(f, "{}", side(&self.start))
        } else {
            write!(f, "{}/{}", side(&self.start), side(&self.end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_instant_forms() {
        assert_eq!(parse_instant("2024-01-01T00:00:00Z").unwrap(), utc(2024, 1, 1, 0));
        assert_eq!(
            parse_instant("2024-01-01T09:00:00+09:00").unwrap(),
            utc(2024, 1, 1, 0)
        );
        assert_eq!(parse_instant("2024-01-01T05:00:00").unwrap(), utc(2024, 1, 1, 5));
        assert_eq!(parse_instant("2024-01-01").unwrap(), utc(2024, 1, 1, 0));
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn test_parse_single_instant_range() {
        let r = DatetimeRange::parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(r.start, Some(utc(2024, 1, 1, 0)));
        assert_eq!(r.end, Some(utc(2024, 1, 1, 0)));
        assert!(r.contains(&utc(2024, 1, 1, 0)));
        assert!(!r.contains(&utc(2024, 1, 1, 1)));
    }

    #[test]
    fn test_parse_closed_and_open_ranges() {
        let closed = DatetimeRange::parse("2023-01-01/2023-12-31T23:59:59Z").unwrap();
        assert!(closed.contains(&utc(2023, 6, 1, 0)));
        assert!(closed.contains(&utc(2023, 1, 1, 0)));
        assert!(!closed.contains(&utc(2024, 1, 1, 0)));

        let open_start = DatetimeRange::parse("../2023-01-01").unwrap();
        assert_eq!(open_start.start, None);
        assert!(open_start.contains(&utc(1990, 1, 1, 0)));

        let open_end = DatetimeRange::parse("2023-01-01/").unwrap();
        assert_eq!(open_end.end, None);
        assert!(open_end.contains(&utc(2099, 1, 1, 0)));
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(DatetimeRange::parse("../..").is_err());
        assert!(DatetimeRange::parse("2024-01-01/2023-01-01").is_err());
        assert!(DatetimeRange::parse("2024-13-01").is_err());
        assert!(DatetimeRange::parse("").is_err());
    }

    #[test]
    fn test_display() {
        let r = DatetimeRange::parse("../2023-01-01").unwrap();
        assert_eq!(r.to_string(), "../2023-01-01T00:00:00+00:00");
    }
}
