use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Inclusive reporting period; both ends are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodKey {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if end < start {
            return Err(EngineError::InvalidPeriod { start, end });
        }
        Ok(Self { start, end })
    }

    /// Thursday to Wednesday week containing `date`.
    pub fn thursday_week(date: NaiveDate) -> Self {
        let days_back = (date.weekday().num_days_from_sunday() as i64 + 7 - 4) % 7;
        let start = date - Duration::days(days_back);
        Self {
            start,
            end: start + Duration::days(6),
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The period of the same length ending the day before this one starts.
    pub fn previous(&self) -> Self {
        let length = Duration::days(self.days());
        Self {
            start: self.start - length,
            end: self.end - length,
        }
    }

    /// `count` preceding periods, oldest first.
    pub fn preceding(&self, count: usize) -> Vec<Self> {
        let mut periods = Vec::with_capacity(count);
        let mut cursor = *self;
        for _ in 0..count {
            cursor = cursor.previous();
            periods.push(cursor);
        }
        periods.reverse();
        periods
    }

    pub fn key(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.start, self.end)
    }
}

impl FromStr for PeriodKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidPeriodKey(s.to_string());
        let (start, end) = s.split_once('_').ok_or_else(invalid)?;
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").map_err(|_| invalid())?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").map_err(|_| invalid())?;
        PeriodKey::new(start, end)
    }
}
