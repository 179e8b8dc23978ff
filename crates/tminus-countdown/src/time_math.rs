//! Human-readable time remaining until an instant.
//!
//! A year counts as 365 days and a month as 30.5 days. Deltas that sit within
//! ten seconds below a whole-day boundary are rounded up and reported in whole
//! days, so a countdown checked a moment after its daily reminder time reads
//! "5 days" rather than "4 days, 23 hours, 59 minutes and 59 seconds".

use std::fmt;

use chrono::{DateTime, Utc};

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_MONTH: i64 = 2_635_200; // 30.5 days
const SECS_PER_YEAR: i64 = 31_536_000; // 365 days

/// Seconds-within-day at or above which the delta is rounded up to whole days.
const NEAR_DAY_THRESHOLD_SECS: i64 = 86_390;

/// A unit in a remaining-time decomposition, largest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl TimeUnit {
    /// Singular English name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
        }
    }

    /// `"1 day"`, `"3 days"`.
    pub fn quantity(self, value: u64) -> String {
        if value == 1 {
            format!("{value} {}", self.name())
        } else {
            format!("{value} {}s", self.name())
        }
    }
}

/// Time left until (or elapsed since) a target instant.
///
/// Holds the magnitude only, as `(value, unit)` pairs from the largest unit
/// down, with zero-valued units left out. [`Remaining::is_past`] tells whether
/// the target has already gone by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remaining {
    past: bool,
    parts: Vec<(u64, TimeUnit)>,
}

impl Remaining {
    /// Decomposition, largest unit first.
    pub fn parts(&self) -> &[(u64, TimeUnit)] {
        &self.parts
    }

    /// The target instant lies in the past.
    pub fn is_past(&self) -> bool {
        self.past
    }

    /// Nothing left (rounded to the nearest second).
    pub fn is_zero(&self) -> bool {
        self.parts.is_empty()
    }

    /// Each component rendered on its own, e.g. `["2 days", "1 hour"]`.
    pub fn items(&self) -> Vec<String> {
        self.parts
            .iter()
            .map(|(value, unit)| unit.quantity(*value))
            .collect()
    }
}

/// Joins components as `"a, b and c"`. Zero renders as `"0 seconds"`.
impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.items();
        match items.as_slice() {
            [] => f.write_str(&TimeUnit::Second.quantity(0)),
            [only] => f.write_str(only),
            [init @ .., last] => write!(f, "{} and {}", init.join(", "), last),
        }
    }
}

/// Time remaining from now until `target`.
pub fn remaining(target: DateTime<Utc>) -> Remaining {
    remaining_between(target, Utc::now())
}

/// Time remaining from `now` until `target`.
pub fn remaining_between(target: DateTime<Utc>, now: DateTime<Utc>) -> Remaining {
    let delta = target - now;
    let past = delta < chrono::Duration::zero();
    let millis = delta.num_milliseconds().unsigned_abs() as i64;

    let whole_secs = millis / 1000;
    let parts = if whole_secs % SECS_PER_DAY >= NEAR_DAY_THRESHOLD_SECS {
        let days = whole_secs / SECS_PER_DAY + 1;
        decompose_days(days * SECS_PER_DAY)
    } else {
        decompose_secs((millis + 500) / 1000)
    };

    Remaining { past, parts }
}

/// Years, months, and days, with the day count rounded to nearest.
fn decompose_days(total_secs: i64) -> Vec<(u64, TimeUnit)> {
    let years = total_secs / SECS_PER_YEAR;
    let rest = total_secs % SECS_PER_YEAR;
    let months = rest / SECS_PER_MONTH;
    let rest = rest % SECS_PER_MONTH;
    let days = (rest + SECS_PER_DAY / 2) / SECS_PER_DAY;

    non_zero(&[
        (years, TimeUnit::Year),
        (months, TimeUnit::Month),
        (days, TimeUnit::Day),
    ])
}

fn decompose_secs(total_secs: i64) -> Vec<(u64, TimeUnit)> {
    let mut rest = total_secs;
    let mut take = |unit_secs: i64| {
        let value = rest / unit_secs;
        rest %= unit_secs;
        value
    };

    let years = take(SECS_PER_YEAR);
    let months = take(SECS_PER_MONTH);
    let days = take(SECS_PER_DAY);
    let hours = take(SECS_PER_HOUR);
    let minutes = take(SECS_PER_MINUTE);
    let seconds = take(1);

    non_zero(&[
        (years, TimeUnit::Year),
        (months, TimeUnit::Month),
        (days, TimeUnit::Day),
        (hours, TimeUnit::Hour),
        (minutes, TimeUnit::Minute),
        (seconds, TimeUnit::Second),
    ])
}

fn non_zero(parts: &[(i64, TimeUnit)]) -> Vec<(u64, TimeUnit)> {
    parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|&(value, unit)| (value as u64, unit))
        .collect()
}
