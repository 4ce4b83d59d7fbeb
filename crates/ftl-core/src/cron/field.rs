//! Single cron field: a comma-separated list of ranges with optional steps.

use std::fmt;

/// Position of a field within the normalized seven-field pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Component {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl Component {
    pub(crate) const ALL: [Self; 7] = [
        Self::Second,
        Self::Minute,
        Self::Hour,
        Self::DayOfMonth,
        Self::Month,
        Self::DayOfWeek,
        Self::Year,
    ];

    /// Inclusive bounds of legal values.
    pub(crate) const fn bounds(self) -> (u32, u32) {
        match self {
            Self::Second | Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            // 0 and 7 are both Sunday.
            Self::DayOfWeek => (0, 7),
            Self::Year => (0, 3000),
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day of month",
            Self::Month => "month",
            Self::DayOfWeek => "day of week",
            Self::Year => "year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueRange {
    Full,
    Single(u32),
    Span(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    pub(crate) range: ValueRange,
    pub(crate) every: Option<u32>,
}

impl Step {
    pub(crate) const fn full() -> Self {
        Self {
            range: ValueRange::Full,
            every: None,
        }
    }

    pub(crate) const fn value(value: u32) -> Self {
        Self {
            range: ValueRange::Single(value),
            every: None,
        }
    }

    pub(crate) const fn every(every: u32) -> Self {
        Self {
            range: ValueRange::Full,
            every: Some(every),
        }
    }

    /// Returns `(start, end, increment)` for this step in `component`.
    ///
    /// `a/n` runs from `a` to the component maximum; a bare `a` is `a-a`.
    fn parameters(self, component: Component) -> (u32, u32, u32) {
        let (min, max) = component.bounds();
        let incr = self.every.unwrap_or(1).max(1);
        match self.range {
            ValueRange::Full => (min, max, incr),
            ValueRange::Single(start) if self.every.is_some() => (start, max, incr),
            ValueRange::Single(start) => (start, start, incr),
            ValueRange::Span(start, end) => (start, end, incr),
        }
    }

    fn matches(self, value: u32, component: Component) -> bool {
        let (start, end, incr) = self.parameters(component);
        value >= start && value <= end && (value - start) % incr == 0
    }

    fn next_at_or_after(self, value: u32, component: Component) -> Option<u32> {
        let (start, end, incr) = self.parameters(component);
        let candidate = if value <= start {
            start
        } else {
            start + (value - start).div_ceil(incr) * incr
        };
        (candidate <= end).then_some(candidate)
    }

    fn validate(self, component: Component) -> Result<(), String> {
        let (min, max) = component.bounds();
        let in_bounds = |v: u32| {
            if v < min || v > max {
                Err(format!(
                    "value {v} out of allowed {} range of {min}-{max}",
                    component.name()
                ))
            } else {
                Ok(())
            }
        };
        match self.range {
            ValueRange::Full => {}
            ValueRange::Single(v) => in_bounds(v)?,
            ValueRange::Span(start, end) => {
                in_bounds(start)?;
                in_bounds(end)?;
                if end < start {
                    return Err(format!("range end {end} is less than start {start}"));
                }
            }
        }
        if let Some(every) = self.every {
            if every == 0 {
                return Err("step must be positive".to_string());
            }
            if every > max - min {
                return Err(format!(
                    "step {every} is larger than allowed {} range of {min}-{max}",
                    component.name()
                ));
            }
        }
        Ok(())
    }

    fn parse(text: &str) -> Result<Self, String> {
        let (range, every) = match text.split_once('/') {
            Some((range, every)) => (range, Some(parse_number(every)?)),
            None => (text, None),
        };
        let range = if range == "*" {
            ValueRange::Full
        } else if let Some((start, end)) = range.split_once('-') {
            ValueRange::Span(parse_number(start)?, parse_number(end)?)
        } else {
            ValueRange::Single(parse_number(range)?)
        };
        Ok(Self { range, every })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            ValueRange::Full => f.write_str("*")?,
            ValueRange::Single(v) => write!(f, "{v}")?,
            ValueRange::Span(start, end) => write!(f, "{start}-{end}")?,
        }
        if let Some(every) = self.every {
            write!(f, "/{every}")?;
        }
        Ok(())
    }
}

fn parse_number(text: &str) -> Result<u32, String> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("expected a number, found {text:?}"));
    }
    text.parse::<u32>()
        .map_err(|e| format!("invalid number {text:?}: {e}"))
}

/// One field of a cron pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Field {
    steps: Vec<Step>,
}

impl Field {
    pub(crate) fn of(step: Step) -> Self {
        Self { steps: vec![step] }
    }

    pub(crate) fn wildcard() -> Self {
        Self::of(Step::full())
    }

    pub(crate) fn parse(text: &str) -> Result<Self, String> {
        let steps = text
            .split(',')
            .map(Step::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    /// True for a bare `*`, which is what POSIX day matching keys on.
    pub(crate) fn is_wildcard(&self) -> bool {
        self.steps.as_slice() == [Step::full()]
    }

    /// True if any value in this field is at least 1000.
    pub(crate) fn looks_like_year(&self) -> bool {
        self.steps.iter().any(|step| match step.range {
            ValueRange::Full => false,
            ValueRange::Single(v) => v >= 1000,
            ValueRange::Span(start, end) => start >= 1000 || end >= 1000,
        })
    }

    pub(crate) fn validate(&self, component: Component) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("{} must have at least one value", component.name()));
        }
        self.steps.iter().try_for_each(|step| step.validate(component))
    }

    pub(crate) fn matches(&self, value: u32, component: Component) -> bool {
        self.steps.iter().any(|step| step.matches(value, component))
    }

    /// Smallest allowed value that is `>= value`, if any.
    pub(crate) fn next_at_or_after(&self, value: u32, component: Component) -> Option<u32> {
        self.steps
            .iter()
            .filter_map(|step| step.next_at_or_after(value, component))
            .min()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.steps.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}
