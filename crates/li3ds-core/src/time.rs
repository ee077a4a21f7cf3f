//! Date/time normalization for record attributes

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use std::cmp::Ordering;
use std::fmt::Write;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeError {
    #[error("unrecognized date/time: {0:?}")]
    Unrecognized(String),
    #[error("invalid date/time format: {0:?}")]
    Format(String),
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const AWARE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// A parsed point in time, with or without a UTC offset.
///
/// Equality and ordering both go through the instant, so
/// `12:00:00+00:00` equals a naive `12:00:00`.
#[derive(Debug, Clone, Copy)]
pub enum Timestamp {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl Timestamp {
    /// Parse the common ISO 8601 spellings (`T` or space separator,
    /// optional fraction, optional offset, date only)
    pub fn parse(input: &str) -> Result<Self, TimeError> {
        let s = input.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::Aware(dt));
        }
        for fmt in AWARE_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Ok(Self::Aware(dt));
            }
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self::Naive(dt));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Self::Naive)
            .ok_or_else(|| TimeError::Unrecognized(input.to_string()))
    }

    /// ISO 8601 rendering; microseconds only when the fraction is non-zero
    pub fn isoformat(&self) -> String {
        let fraction = match self {
            Self::Aware(dt) => dt.nanosecond(),
            Self::Naive(dt) => dt.nanosecond(),
        };
        let seconds = if fraction == 0 { "%S" } else { "%S%.6f" };
        match self {
            Self::Aware(dt) => dt
                .format(&format!("%Y-%m-%dT%H:%M:{seconds}%:z"))
                .to_string(),
            Self::Naive(dt) => dt.format(&format!("%Y-%m-%dT%H:%M:{seconds}")).to_string(),
        }
    }

    /// strftime-style rendering, e.g. `%y%m%d`
    pub fn format(&self, spec: &str) -> Result<String, TimeError> {
        let mut out = String::new();
        let written = match self {
            Self::Aware(dt) => write!(out, "{}", dt.format(spec)),
            Self::Naive(dt) => write!(out, "{}", dt.format(spec)),
        };
        written
            .map(|_| out)
            .map_err(|_| TimeError::Format(spec.to_string()))
    }

    /// Instant used for ordering; offset-aware values are compared in UTC
    fn instant(&self) -> NaiveDateTime {
        match self {
            Self::Aware(dt) => dt.naive_utc(),
            Self::Naive(dt) => *dt,
        }
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.instant() == other.instant()
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instant().cmp(&other.instant())
    }
}

/// Normalize a date/time string to ISO 8601
pub fn isoformat(input: &str) -> Result<String, TimeError> {
    Timestamp::parse(input).map(|t| t.isoformat())
}
