//! Contract tests for cron pattern normalization and firing series.

use chrono::{DateTime, TimeZone, Utc};
use ftl_core::cron::Pattern;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn series(pattern: &str, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let pattern = Pattern::parse(pattern).unwrap();
    let mut out = Vec::with_capacity(count);
    let mut t = from;
    for _ in 0..count {
        t = pattern.next(t, false).unwrap();
        out.push(t);
    }
    out
}

#[test]
fn normalizes_every_accepted_form_to_seven_fields() {
    let cases = [
        ("*/2 * * * *", "0 */2 * * * * *"),
        ("0 12 * * 1-5 2030", "0 0 12 * * 1-5 2030"),
        ("15 0 12 * * 1-5", "15 0 12 * * 1-5 *"),
        ("1 2 3 4 5 6 2040", "1 2 3 4 5 6 2040"),
        ("45s", "*/45 * * * * * *"),
        ("wednesday", "0 0 0 * * 3 *"),
    ];
    for (input, normalized) in cases {
        let pattern = Pattern::parse(input).unwrap();
        assert_eq!(pattern.to_string(), normalized, "{input}");
        assert_eq!(pattern.as_str(), input);
    }
}

#[test]
fn every_two_seconds_series() {
    let fired = series("*/2 * * * * * *", utc(2025, 1, 1, 0, 0, 0), 3);
    assert_eq!(
        fired,
        vec![
            utc(2025, 1, 1, 0, 0, 2),
            utc(2025, 1, 1, 0, 0, 4),
            utc(2025, 1, 1, 0, 0, 6),
        ]
    );
}

#[test]
fn weekday_business_hours_series_skips_weekend() {
    // Friday 2024-05-03 17:00, next weekday 09:00 is Monday.
    let fired = series("0 9 * * 1-5", utc(2024, 5, 3, 17, 0, 0), 2);
    assert_eq!(fired, vec![utc(2024, 5, 6, 9, 0, 0), utc(2024, 5, 7, 9, 0, 0)]);
}

#[test]
fn month_end_days_skip_short_months() {
    let fired = series("0 0 0 31 * *", utc(2024, 1, 31, 0, 0, 0), 3);
    assert_eq!(
        fired,
        vec![
            utc(2024, 3, 31, 0, 0, 0),
            utc(2024, 5, 31, 0, 0, 0),
            utc(2024, 7, 31, 0, 0, 0),
        ]
    );
}

#[test]
fn parse_errors_name_the_pattern() {
    let err = Pattern::parse("0 0 0 30 2 * *").unwrap_err();
    assert!(err.to_string().contains("0 0 0 30 2 * *"));
}
