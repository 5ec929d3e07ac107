//! Date/time input parsing and query-window defaults.

use {
    chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc},
    chrono_tz::Tz,
};

use crate::{
    error::{Error, Result},
    types::{EventTime, TimeRange},
};

pub const DATE_FORMAT_HINT: &str = "Use YYYY-MM-DD or RFC3339/ISO-8601 format";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Days before "now" covered when the caller gives no start.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
/// Days after "now" covered when the caller gives no end.
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 30;

/// Windows narrower than this are answered but known to be unreliable
/// against iCloud.
#[must_use]
pub fn min_reliable_range() -> TimeDelta {
    TimeDelta::days(2)
}

/// Resolve an optional IANA name, falling back to `default`.
pub fn resolve_timezone(name: Option<&str>, default: Tz) -> Result<Tz> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        None => Ok(default),
        Some(n) => n
            .parse::<Tz>()
            .map_err(|_| Error::validation(format!("unknown timezone \"{n}\""))),
    }
}

/// Parse a caller-supplied date or date-time.
///
/// A bare `YYYY-MM-DD` yields [`EventTime::Date`]. Values with an offset
/// or `Z` keep it; naive date-times are placed in `tz`.
pub fn parse_time_input(field: &str, value: &str, tz: Tz) -> Result<EventTime> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("{field} is required")));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(EventTime::Date(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(EventTime::DateTime(dt));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return localize(field, naive, tz).map(EventTime::DateTime);
    }

    Err(Error::validation(format!(
        "invalid {field} \"{value}\". {DATE_FORMAT_HINT}"
    )))
}

/// Like [`parse_time_input`] but always timed; bare dates become local
/// midnight in `tz`.
pub fn parse_datetime_input(field: &str, value: &str, tz: Tz) -> Result<DateTime<FixedOffset>> {
    match parse_time_input(field, value, tz)?.to_datetime(tz) {
        EventTime::DateTime(dt) => Ok(dt),
        EventTime::Date(_) => Err(Error::validation(format!("invalid {field}"))),
    }
}

/// Strict `YYYY-MM-DD`, as required for all-day events.
pub fn parse_date_input(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        Error::validation(format!(
            "all-day {field} must be a date in YYYY-MM-DD format, got \"{}\"",
            value.trim()
        ))
    })
}

fn localize(field: &str, naive: NaiveDateTime, tz: Tz) -> Result<DateTime<FixedOffset>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| {
            Error::validation(format!(
                "{field} {naive} does not exist in {tz} (daylight-saving gap)"
            ))
        })
}

/// Build the query window for `list_my_events`.
///
/// With neither bound the window is `now - 7d .. now + 30d`. With one bound
/// the same 37-day span is anchored on it.
pub fn resolve_range(
    start: Option<&str>,
    end: Option<&str>,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<TimeRange> {
    let span = TimeDelta::days(DEFAULT_LOOKBACK_DAYS + DEFAULT_LOOKAHEAD_DAYS);
    let parse = |field, v: &str| -> Result<DateTime<Utc>> {
        Ok(parse_datetime_input(field, v, tz)?.with_timezone(&Utc))
    };
    let start = start.map(str::trim).filter(|s| !s.is_empty());
    let end = end.map(str::trim).filter(|s| !s.is_empty());

    let range = match (start, end) {
        (Some(s), Some(e)) => TimeRange {
            start: parse("start", s)?,
            end: parse("end", e)?,
        },
        (Some(s), None) => {
            let start = parse("start", s)?;
            TimeRange {
                start,
                end: start + span,
            }
        },
        (None, Some(e)) => {
            let end = parse("end", e)?;
            TimeRange {
                start: end - span,
                end,
            }
        },
        (None, None) => TimeRange {
            start: now - TimeDelta::days(DEFAULT_LOOKBACK_DAYS),
            end: now + TimeDelta::days(DEFAULT_LOOKAHEAD_DAYS),
        },
    };

    if range.end <= range.start {
        return Err(Error::validation(format!(
            "end ({}) must be after start ({})",
            range.end.to_rfc3339(),
            range.start.to_rfc3339()
        )));
    }
    Ok(range)
}

/// UTC instant in CalDAV basic format (`YYYYMMDDTHHMMSSZ`).
#[must_use]
pub fn format_caldav_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    #[rstest]
    #[case("2025-06-15T10:00:00Z", "2025-06-15T10:00:00+00:00")]
    #[case("2025-06-15T10:00:00+02:00", "2025-06-15T10:00:00+02:00")]
    #[case("2025-06-15T10:00:00", "2025-06-15T10:00:00+00:00")]
    #[case("2025-06-15T10:00", "2025-06-15T10:00:00+00:00")]
    #[case("2025-06-15 10:00:00", "2025-06-15T10:00:00+00:00")]
    #[case("2025-06-15T10:00:00.250", "2025-06-15T10:00:00.250+00:00")]
    fn parses_timed_inputs(#[case] input: &str, #[case] expected: &str) {
        let parsed = parse_time_input("start", input, utc()).unwrap();
        assert_eq!(parsed.to_iso(), expected);
    }

    #[test]
    fn bare_date_is_date() {
        let parsed = parse_time_input("start", "2025-12-25", utc()).unwrap();
        assert!(parsed.is_date());
        let dt = parse_datetime_input("start", "2025-12-25", utc()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-12-25T00:00:00+00:00");
    }

    #[test]
    fn naive_input_uses_given_zone() {
        let tz: Tz = "America/Los_Angeles".parse().unwrap();
        let dt = parse_datetime_input("start", "2025-07-01T09:00:00", tz).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-07-01T09:00:00-07:00");
    }

    #[rstest]
    #[case("tomorrow")]
    #[case("15/06/2025")]
    #[case("2025-13-01")]
    fn rejects_garbage(#[case] input: &str) {
        let err = parse_time_input("start", input, utc()).unwrap_err();
        assert_eq!(err.kind(), calbridge_common::ErrorKind::Validation);
        assert!(err.to_string().contains(DATE_FORMAT_HINT));
    }

    #[test]
    fn dst_gap_is_validation_error() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let err = parse_datetime_input("start", "2025-03-30T02:30:00", tz).unwrap_err();
        assert!(err.to_string().contains("daylight-saving"));
    }

    #[test]
    fn all_day_requires_plain_date() {
        assert!(parse_date_input("start", "2025-12-25").is_ok());
        assert!(parse_date_input("start", "2025-12-25T10:00:00").is_err());
    }

    #[test]
    fn unknown_timezone_rejected() {
        assert!(resolve_timezone(Some("Mars/Olympus"), utc()).is_err());
        assert_eq!(resolve_timezone(Some("  "), utc()).unwrap(), utc());
        assert_eq!(
            resolve_timezone(Some("Asia/Tokyo"), utc()).unwrap(),
            chrono_tz::Asia::Tokyo
        );
    }

    #[test]
    fn default_range_spans_last_week_to_next_month() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let range = resolve_range(None, None, utc(), now).unwrap();
        assert_eq!(range.start, now - TimeDelta::days(7));
        assert_eq!(range.end, now + TimeDelta::days(30));
    }

    #[test]
    fn single_bound_anchors_window() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let range = resolve_range(Some("2024-01-01"), None, utc(), now).unwrap();
        assert_eq!(format_caldav_utc(range.start), "20240101T000000Z");
        assert_eq!(range.duration(), TimeDelta::days(37));

        let range = resolve_range(None, Some("2024-01-01"), utc(), now).unwrap();
        assert_eq!(format_caldav_utc(range.end), "20240101T000000Z");
    }

    #[test]
    fn inverted_range_rejected() {
        let now = Utc::now();
        let err = resolve_range(Some("2025-06-10"), Some("2025-06-01"), utc(), now).unwrap_err();
        assert_eq!(err.kind(), calbridge_common::ErrorKind::Validation);
    }
}
