//! Extended cron patterns.
//!
//! Accepted forms, all normalized to seven fields
//! (`second minute hour day-of-month month day-of-week year`):
//!
//! | Form | Interpretation |
//! |---|---|
//! | 5 fields `m h dom mon dow` | seconds = 0, any year |
//! | 6 fields ending in a value >= 1000 | `m h dom mon dow year`, seconds = 0 |
//! | 6 fields otherwise | `s m h dom mon dow`, any year |
//! | 7 fields | `s m h dom mon dow year` |
//! | `Ns`, `Nm`, `Nh` | every N seconds/minutes/hours, lower fields zeroed |
//! | `mon` .. `sun` | midnight on that weekday |
//!
//! Fields support `*`, `a-b`, `a,b,c`, `a/n` and `a-b/n`. Day-of-month and
//! day-of-week combine the POSIX way: when both are restricted, a day matching
//! either fires.
//!
//! All computation is in UTC.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use ftl_core::cron::Pattern;
//!
//! let pattern = Pattern::parse("0 0 0 29 2 * *").unwrap();
//! let origin = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
//! let next = pattern.next(origin, false).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());
//! ```

mod field;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Timelike, Utc};

use crate::error::{Error, Result};

use field::{Component, Field, Step};

/// Latest year a pattern may fire in.
pub const MAX_YEAR: u32 = 3000;

/// How day-of-month and day-of-week restrict the firing day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayBehavior {
    DayOfMonthOnly,
    DayOfWeekOnly,
    Either,
}

/// A parsed, validated cron pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    text: String,
    fields: [Field; 7],
}

impl Pattern {
    /// Parses and validates a pattern.
    ///
    /// Validation includes computing a firing from 2020-01-01, so patterns
    /// that can never fire (`0 0 0 30 2 *`) are rejected here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCronPattern`] when the text is malformed, a
    /// value is out of range, or no firing exists before year 3000.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let fields = normalize(trimmed).map_err(|message| Error::cron(trimmed, message))?;
        for (field, component) in fields.iter().zip(Component::ALL) {
            field
                .validate(component)
                .map_err(|message| Error::cron(trimmed, message))?;
        }
        let pattern = Self {
            text: trimmed.to_string(),
            fields,
        };
        let reference = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().ok_or_else(|| {
            Error::internal("reference time out of range")
        })?;
        pattern.next(reference, true)?;
        Ok(pattern)
    }

    /// Returns the pattern text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the smallest time satisfying every field that is `> origin`,
    /// or `>= origin` when `inclusive`.
    ///
    /// Sub-second origins always round up to the next whole second.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCronPattern`] if no firing exists before the
    /// year horizon.
    pub fn next(&self, origin: DateTime<Utc>, inclusive: bool) -> Result<DateTime<Utc>> {
        let truncated = origin.with_nanosecond(0).unwrap_or(origin);
        let mut t = if !inclusive || origin.nanosecond() != 0 {
            truncated + TimeDelta::seconds(1)
        } else {
            truncated
        };

        let exhausted = || Error::cron(&self.text, "no next time within the year horizon");
        let [second, minute, hour, _, month, _, year] = &self.fields;

        loop {
            let y = u32::try_from(t.year()).unwrap_or(0);
            if y > MAX_YEAR {
                return Err(exhausted());
            }
            if !year.matches(y, Component::Year) {
                let next_year = year
                    .next_at_or_after(y + 1, Component::Year)
                    .ok_or_else(exhausted)?;
                t = at(next_year, 1, 1, 0, 0, 0).ok_or_else(exhausted)?;
                continue;
            }

            if !month.matches(t.month(), Component::Month) {
                t = match month.next_at_or_after(t.month() + 1, Component::Month) {
                    Some(m) => at(y, m, 1, 0, 0, 0),
                    None => at(y + 1, 1, 1, 0, 0, 0),
                }
                .ok_or_else(exhausted)?;
                continue;
            }

            if !self.day_matches(t.date_naive()) {
                let next_day = t.date_naive().succ_opt().ok_or_else(exhausted)?;
                t = at(
                    u32::try_from(next_day.year()).unwrap_or(0),
                    next_day.month(),
                    next_day.day(),
                    0,
                    0,
                    0,
                )
                .ok_or_else(exhausted)?;
                continue;
            }

            let start_of_day = at(y, t.month(), t.day(), 0, 0, 0).ok_or_else(exhausted)?;
            if !hour.matches(t.hour(), Component::Hour) {
                t = match hour.next_at_or_after(t.hour() + 1, Component::Hour) {
                    Some(h) => start_of_day + TimeDelta::hours(i64::from(h)),
                    None => start_of_day + TimeDelta::days(1),
                };
                continue;
            }

            let start_of_hour = start_of_day + TimeDelta::hours(i64::from(t.hour()));
            if !minute.matches(t.minute(), Component::Minute) {
                t = match minute.next_at_or_after(t.minute() + 1, Component::Minute) {
                    Some(m) => start_of_hour + TimeDelta::minutes(i64::from(m)),
                    None => start_of_hour + TimeDelta::hours(1),
                };
                continue;
            }

            let start_of_minute = start_of_hour + TimeDelta::minutes(i64::from(t.minute()));
            if !second.matches(t.second(), Component::Second) {
                t = match second.next_at_or_after(t.second() + 1, Component::Second) {
                    Some(s) => start_of_minute + TimeDelta::seconds(i64::from(s)),
                    None => start_of_minute + TimeDelta::minutes(1),
                };
                continue;
            }

            return Ok(t);
        }
    }

    fn day_behavior(&self) -> DayBehavior {
        let [_, _, _, day_of_month, month, day_of_week, _] = &self.fields;
        let month_any = month.is_wildcard();
        let dom_any = day_of_month.is_wildcard();
        let dow_any = day_of_week.is_wildcard();
        if dow_any {
            DayBehavior::DayOfMonthOnly
        } else if month_any && dom_any {
            DayBehavior::DayOfWeekOnly
        } else {
            DayBehavior::Either
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let [_, _, _, day_of_month, _, day_of_week, _] = &self.fields;
        let by_month = || day_of_month.matches(date.day(), Component::DayOfMonth);
        let by_week = || {
            let weekday = date.weekday().num_days_from_sunday();
            day_of_week.matches(weekday, Component::DayOfWeek)
                || (weekday == 0 && day_of_week.matches(7, Component::DayOfWeek))
        };
        match self.day_behavior() {
            DayBehavior::DayOfMonthOnly => by_month(),
            DayBehavior::DayOfWeekOnly => by_week(),
            DayBehavior::Either => by_month() || by_week(),
        }
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Renders the normalized seven-field form.
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

fn at(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?
        .and_hms_opt(hour, minute, second)
        .map(|naive| naive.and_utc())
}

fn normalize(text: &str) -> std::result::Result<[Field; 7], String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if let [single] = tokens.as_slice() {
        if let Some(fields) = shorthand(single)? {
            return Ok(fields);
        }
        if let Some(day) = weekday(single) {
            return Ok([
                Field::of(Step::value(0)),
                Field::of(Step::value(0)),
                Field::of(Step::value(0)),
                Field::wildcard(),
                Field::wildcard(),
                Field::of(Step::value(day)),
                Field::wildcard(),
            ]);
        }
    }

    let parsed = tokens
        .iter()
        .map(|token| Field::parse(token))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if let Ok([m, h, dom, mon, dow]) = <[Field; 5]>::try_from(parsed.clone()) {
        return Ok([Field::of(Step::value(0)), m, h, dom, mon, dow, Field::wildcard()]);
    }
    match <[Field; 6]>::try_from(parsed.clone()) {
        Ok([a, b, c, d, e, last]) if last.looks_like_year() => {
            return Ok([Field::of(Step::value(0)), a, b, c, d, e, last]);
        }
        Ok([s, m, h, dom, mon, dow]) => {
            return Ok([s, m, h, dom, mon, dow, Field::wildcard()]);
        }
        Err(_) => {}
    }
    <[Field; 7]>::try_from(parsed)
        .map_err(|parsed| format!("expected 5-7 components, got {}", parsed.len()))
}

/// Parses `Ns`, `Nm`, `Nh` (and combinations with only one non-zero part).
///
/// Returns `Ok(None)` if `token` is not shorthand at all.
fn shorthand(token: &str) -> std::result::Result<Option<[Field; 7]>, String> {
    let bytes = token.as_bytes();
    if bytes.is_empty()
        || !bytes[0].is_ascii_digit()
        || !bytes.iter().all(|b| b.is_ascii_digit() || b"dhms".contains(b))
        || !bytes.last().is_some_and(u8::is_ascii_alphabetic)
    {
        return Ok(None);
    }

    const UNITS: [u8; 4] = [b'd', b'h', b'm', b's'];
    let mut values = [0u32; 4];
    let mut last_unit: Option<usize> = None;
    let mut digits = String::new();
    for &b in bytes {
        if b.is_ascii_digit() {
            digits.push(char::from(b));
            continue;
        }
        let idx = UNITS
            .iter()
            .position(|u| *u == b)
            .ok_or_else(|| format!("unknown duration unit in {token:?}"))?;
        if last_unit.is_some_and(|last| idx <= last) || digits.is_empty() {
            return Err(format!("duration units out of order in {token:?}"));
        }
        values[idx] = digits
            .parse()
            .map_err(|e| format!("invalid duration {token:?}: {e}"))?;
        digits.clear();
        last_unit = Some(idx);
    }

    let [days, hours, minutes, seconds] = values;
    if days > 0 {
        return Err("durations with days are not allowed".to_string());
    }
    if hours == 0 && minutes == 0 && seconds == 0 {
        return Err("duration must be positive".to_string());
    }

    let mut seen_non_zero = false;
    let mut push = |value: u32| -> std::result::Result<Field, String> {
        if value == 0 {
            Ok(if seen_non_zero {
                Field::wildcard()
            } else {
                Field::of(Step::value(0))
            })
        } else if seen_non_zero {
            Err("only one non-zero component is allowed".to_string())
        } else {
            seen_non_zero = true;
            Ok(Field::of(Step::every(value)))
        }
    };
    let second = push(seconds)?;
    let minute = push(minutes)?;
    let hour = push(hours)?;
    Ok(Some([
        second,
        minute,
        hour,
        Field::wildcard(),
        Field::wildcard(),
        Field::wildcard(),
        Field::wildcard(),
    ]))
}

const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// Full or three-letter day name, case-insensitive.
fn weekday(token: &str) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    WEEKDAYS
        .iter()
        .position(|day| lower == *day || (lower.len() == 3 && day.starts_with(lower.as_str())))
        .and_then(|idx| u32::try_from(idx).ok())
}
