use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid date range '{0}', expected YYYY, YYYY-MM, YYYY-MM-DD or FROM,TO")]
pub struct DateRangeError(String);

/// Capture dates from `after` (inclusive) to `before` (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub after: NaiveDate,
    pub before: NaiveDate,
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            after: NaiveDate::MIN,
            before: NaiveDate::MAX,
        }
    }
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.after && date < self.before
    }

    pub fn is_unbounded(&self) -> bool {
        *self == Self::default()
    }

    /// One year, one month or one day, depending on how much was written.
    fn period(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        let numbers: Vec<u32> = parts
            .iter()
            .map(|p| p.parse().ok())
            .collect::<Option<_>>()?;

        match numbers.as_slice() {
            [y] if parts[0].len() == 4 => {
                let after = NaiveDate::from_ymd_opt(*y as i32, 1, 1)?;
                let before = NaiveDate::from_ymd_opt(*y as i32 + 1, 1, 1)?;
                Some(Self { after, before })
            }
            [y, m] => {
                let after = NaiveDate::from_ymd_opt(*y as i32, *m, 1)?;
                let before = if *m == 12 {
                    NaiveDate::from_ymd_opt(after.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(after.year(), *m + 1, 1)?
                };
                Some(Self { after, before })
            }
            [y, m, d] => {
                let after = NaiveDate::from_ymd_opt(*y as i32, *m, *d)?;
                Some(Self {
                    after,
                    before: after.succ_opt()?,
                })
            }
            _ => None,
        }
    }
}

impl FromStr for DateRange {
    type Err = DateRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.split_once(',') {
            Some((from, to)) => match (Self::period(from), Self::period(to)) {
                (Some(from), Some(to)) if from.after < to.before => Some(Self {
                    after: from.after,
                    before: to.before,
                }),
                _ => None,
            },
            None => Self::period(s),
        };
        parsed.ok_or_else(|| DateRangeError(s.to_string()))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            return f.write_str("unbounded");
        }
        write!(f, "{} to {}", self.after, self.before)
    }
}
