//! `YYYYMM` month keys for driving monthly ingestion.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// A calendar month, the unit of one partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid month key '{0}': expected YYYYMM")]
pub struct MonthKeyError(pub String);

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        self.next().first_day().pred_opt().unwrap_or(NaiveDate::MAX)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Every month from `start` through `end`, inclusive.
    pub fn range(start: MonthKey, end: MonthKey) -> Vec<MonthKey> {
        let mut out = Vec::new();
        let mut cur = start;
        while cur <= end {
            out.push(cur);
            cur = cur.next();
        }
        out
    }
}

impl FromStr for MonthKey {
    type Err = MonthKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || MonthKeyError(s.to_string());
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let year = s[..4].parse().map_err(|_| err())?;
        let month = s[4..].parse().map_err(|_| err())?;
        MonthKey::new(year, month).ok_or_else(err)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_bounds_month() {
        let key: MonthKey = "202402".parse().unwrap();
        assert_eq!(key, MonthKey { year: 2024, month: 2 });
        assert_eq!(key.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(key.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(key.to_string(), "202402");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("2024-02".parse::<MonthKey>().is_err());
        assert!("202413".parse::<MonthKey>().is_err());
        assert!("20241".parse::<MonthKey>().is_err());
    }

    #[test]
    fn range_crosses_year_boundary() {
        let months = MonthKey::range("202311".parse().unwrap(), "202402".parse().unwrap());
        let labels: Vec<String> = months.iter().map(ToString::to_string).collect();
        assert_eq!(labels, ["202311", "202312", "202401", "202402"]);
        assert_eq!(
            MonthKey::of(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()).last_day(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
    }
}
