use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A calendar month a snapshot was published for, written `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotMonth {
    year: i32,
    month: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid month {0:?}, expected YYYY-MM")]
pub struct InvalidMonth(pub String);

impl SnapshotMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidMonth> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(InvalidMonth(format!("{}-{}", year, month)));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// Inclusive ascending range; empty when `start > end`
    pub fn range(start: Self, end: Self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut cur = start;
        while cur <= end {
            out.push(cur);
            cur = cur.next();
        }
        out
    }

    /// The last month that has fully ended as of `today`
    pub fn last_full_month(today: NaiveDate) -> Self {
        Self {
            year: today.year(),
            month: today.month(),
        }
        .prev()
    }

    pub fn current_last_full() -> Self {
        Self::last_full_month(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for SnapshotMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for SnapshotMonth {
    type Err = InvalidMonth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // chrono accepts single-digit months, the column format does not
        if s.len() != 7 || s.as_bytes()[4] != b'-' {
            return Err(InvalidMonth(s.to_string()));
        }
        let date = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .map_err(|_| InvalidMonth(s.to_string()))?;
        Ok(Self {
            year: date.year(),
            month: date.month(),
        })
    }
}

impl Serialize for SnapshotMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
