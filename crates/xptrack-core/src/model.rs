//! Core domain types: subjects, records, events and per-subject series.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Stable external identifier of a tracked subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(i64);

impl SubjectId {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for SubjectId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = std::num::ParseIntError;

    /// Accepts a bare integer or a mention (`<@123>` / `<@!123>`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("<@")
            .and_then(|rest| rest.strip_suffix('>'))
            .map_or(trimmed, |inner| inner.trim_start_matches('!'));
        digits.parse().map(Self)
    }
}

impl ToSql for SubjectId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for SubjectId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Identity and display profile of a tracked subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub avatar: Option<String>,
    /// Recently observed colors, most recent first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_colors: Vec<String>,
}

impl Subject {
    /// Display name, falling back to the numeric id.
    #[must_use]
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// One observation of a subject's cumulative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub subject_id: SubjectId,
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

/// Composite primary key of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    pub subject_id: SubjectId,
    pub timestamp: DateTime<Utc>,
}

impl From<&Record> for RecordKey {
    fn from(record: &Record) -> Self {
        Self {
            subject_id: record.subject_id,
            timestamp: record.timestamp,
        }
    }
}

/// A growth-modifier interval such as a promotional multiplier period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub multiplier: Option<f64>,
}

impl Event {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A single timestamped point inside a [`SubjectSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: i64,
}

/// A subject paired with an ordered slice of its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectSeries {
    pub subject: Subject,
    pub points: Vec<Point>,
}

impl SubjectSeries {
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }

    /// `last - first` over the held points; zero for fewer than two points.
    #[must_use]
    pub fn growth(&self) -> i64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() > 1 => last.value - first.value,
            _ => 0,
        }
    }
}

/// Convert a UTC instant into the microsecond integer stored in SQLite.
#[must_use]
pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Convert a stored microsecond integer back into a UTC instant.
///
/// # Errors
///
/// Returns a conversion error when the value is outside chrono's range.
pub fn from_micros(us: i64) -> FromSqlResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or(FromSqlError::OutOfRange(us))
}

/// The instant `days` whole days before `now`, or `None` when either the
/// span or the result falls outside chrono's range.
#[must_use]
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|span| now.checked_sub_signed(span))
}
