//! Linear projection of a subject's XP towards a target.
//!
//! Targets are parsed from free-form text into a [`Target`]:
//!
//! | input              | target                              |
//! |--------------------|-------------------------------------|
//! | `250k xp`, `1.5mxp`| absolute XP                         |
//! | `lvl 50`, `level50`| absolute level                      |
//! | `<@123>`, `<@!123>`| another subject's trajectory        |
//! | `50`, `1000`       | level (bare numbers up to 1000)     |
//! | `25000`, `2.5k`    | XP (larger bare numbers)            |
//! | `+5`, `-10kxp`     | relative to the subject's current   |
//!
//! The growth rate is `(last - first) / elapsed days` over the subject's
//! records inside the window.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::db::{Store, StoreError};
use crate::error::ErrorCode;
use crate::level::{MAX_LEVEL, level_to_xp, xp_to_level};
use crate::model::{SubjectId, days_before};

/// Default look-back window for growth.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Projections further out than this are rejected.
pub const MAX_TARGET_DISTANCE_DAYS: f64 = 36_500.0;

/// Bare numbers at or below this are levels.
pub const BARE_LEVEL_LIMIT: i64 = 1000;

/// Bare numbers at or above this are subject ids.
pub const BARE_SUBJECT_FLOOR: i64 = 1_000_000_000_000_000;

const SECONDS_PER_DAY: f64 = 86_400.0;
const MICROS_PER_DAY: f64 = 86_400_000_000.0;

#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error("not enough data for {0} within the window")]
    NoData(SubjectId),

    #[error("{0} has not grown within the window")]
    ZeroGrowth(SubjectId),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid window of {0} days")]
    InvalidWindow(i64),

    #[error("target is {days:.0} days away, beyond the {limit:.0} day limit")]
    TargetBounds { days: f64, limit: f64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PredictionError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NoData(_) => ErrorCode::NoData,
            Self::ZeroGrowth(_) => ErrorCode::ZeroGrowth,
            Self::InvalidTarget(_) => ErrorCode::InvalidTarget,
            Self::TargetBounds { .. } => ErrorCode::TargetBounds,
            Self::InvalidWindow(_) => ErrorCode::InvalidArgument,
            Self::Store(err) => err.code(),
        }
    }
}

/// What a prediction aims at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Target {
    Xp(i64),
    Level(i64),
    Subject(SubjectId),
    /// Offset from the subject's current XP or level; the sign is carried by
    /// the inner value.
    Relative(Box<Target>),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xp(xp) => write!(f, "{xp} xp"),
            Self::Level(level) => write!(f, "level {level}"),
            Self::Subject(id) => write!(f, "<@{id}>"),
            Self::Relative(inner) => match inner.as_ref() {
                Self::Xp(n) => write!(f, "{n:+} xp"),
                Self::Level(n) => write!(f, "{n:+} levels"),
                other => write!(f, "relative {other}"),
            },
        }
    }
}

impl FromStr for Target {
    type Err = PredictionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_target(s)
    }
}

/// Parse a free-form target.
///
/// # Errors
///
/// Returns [`PredictionError::InvalidTarget`] for anything outside the
/// grammar in the module docs.
pub fn parse_target(raw: &str) -> Result<Target, PredictionError> {
    let invalid = || PredictionError::InvalidTarget(raw.trim().to_string());
    let text = raw.trim().to_ascii_lowercase();

    let (negative, body) = match text.chars().next() {
        Some('+') => (false, text[1..].trim_start()),
        Some('-') => (true, text[1..].trim_start()),
        _ => (false, text.as_str()),
    };
    let relative = text.starts_with(['+', '-']);
    let signed = |n: i64| if negative { -n } else { n };

    let target = if body.starts_with("<@") {
        if relative {
            return Err(invalid());
        }
        Target::Subject(body.parse::<SubjectId>().map_err(|_| invalid())?)
    } else if let Some(number) = body.strip_suffix("xp") {
        Target::Xp(signed(parse_scaled(number).ok_or_else(invalid)?))
    } else if let Some(number) = body
        .strip_prefix("level")
        .or_else(|| body.strip_prefix("lvl"))
    {
        Target::Level(signed(parse_scaled(number).ok_or_else(invalid)?))
    } else {
        let value = parse_scaled(body).ok_or_else(invalid)?;
        if value <= BARE_LEVEL_LIMIT {
            Target::Level(signed(value))
        } else if value >= BARE_SUBJECT_FLOOR && is_plain_integer(body) {
            if relative {
                return Err(invalid());
            }
            Target::Subject(SubjectId::new(value))
        } else {
            Target::Xp(signed(value))
        }
    };

    if let Target::Level(level) = target {
        if !relative && level > MAX_LEVEL {
            return Err(invalid());
        }
    }

    Ok(if relative {
        Target::Relative(Box::new(target))
    } else {
        target
    })
}

fn is_plain_integer(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a non-negative number with an optional `k`/`m`/`b` scale.
fn parse_scaled(s: &str) -> Option<i64> {
    let s = s.trim();
    let (number, scale) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1e3),
        'm' => (&s[..s.len() - 1], 1e6),
        'b' => (&s[..s.len() - 1], 1e9),
        _ => {
            return s.parse::<i64>().ok().filter(|n| *n >= 0);
        }
    };
    let value: f64 = number.trim().parse().ok()?;
    let scaled = (value * scale).round();
    #[allow(clippy::cast_possible_truncation)]
    let result = scaled as i64;
    (scaled.is_finite() && (0.0..9.0e18).contains(&scaled)).then_some(result)
}

/// Current value and growth rate of one subject over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub current: i64,
    pub rate_per_day: f64,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

/// Positive-growth trend of `subject` since `window_start`.
///
/// # Errors
///
/// [`PredictionError::NoData`] with fewer than two records in the window,
/// [`PredictionError::ZeroGrowth`] when the value did not increase.
pub fn trend(
    store: &Store,
    subject: SubjectId,
    window_start: DateTime<Utc>,
) -> Result<Trend, PredictionError> {
    let records = store.records_for(subject, Some(window_start), None)?;
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Err(PredictionError::NoData(subject));
    };
    if records.len() < 2 {
        return Err(PredictionError::NoData(subject));
    }

    let growth = last.value - first.value;
    if growth <= 0 {
        return Err(PredictionError::ZeroGrowth(subject));
    }

    let span = last.timestamp - first.timestamp;
    #[allow(clippy::cast_precision_loss)]
    let elapsed_days = span.num_microseconds().map_or_else(
        || span.num_seconds() as f64 / SECONDS_PER_DAY,
        |us| us as f64 / MICROS_PER_DAY,
    );
    #[allow(clippy::cast_precision_loss)]
    let rate_per_day = growth as f64 / elapsed_days;

    Ok(Trend {
        current: last.value,
        rate_per_day,
        first_at: first.timestamp,
        last_at: last.timestamp,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionOptions {
    pub window_days: i64,
    /// Replace the subject's own rate (XP per day).
    pub growth_override: Option<f64>,
    pub max_target_days: f64,
}

impl Default for PredictionOptions {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            growth_override: None,
            max_target_days: MAX_TARGET_DISTANCE_DAYS,
        }
    }
}

/// Result of [`Prediction::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    /// Days from the subject's last record until the target is met. Negative
    /// when the target lies in the past.
    pub days: f64,
    pub rate_per_day: f64,
    pub current: i64,
    /// The resolved (non-relative) target.
    pub target: Target,
    /// XP the subject has to reach (the other subject's current XP for
    /// subject targets).
    pub target_xp: i64,
}

impl Projection {
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.days >= 0.0
    }

    /// Wall-clock instant the target is met, counted from `from`.
    #[must_use]
    pub fn eta(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        #[allow(clippy::cast_possible_truncation)]
        let seconds = (self.days * SECONDS_PER_DAY).round() as i64;
        Duration::try_seconds(seconds).and_then(|d| from.checked_add_signed(d))
    }
}

/// A prepared projection of one subject towards one target.
#[derive(Debug)]
pub struct Prediction<'a> {
    store: &'a Store,
    subject: SubjectId,
    target: Target,
    current: i64,
    rate_per_day: f64,
    window_start: DateTime<Utc>,
    max_target_days: f64,
}

impl<'a> Prediction<'a> {
    /// Load the subject's trend and resolve relative targets.
    ///
    /// # Errors
    ///
    /// [`PredictionError::NoData`], [`PredictionError::ZeroGrowth`] (unless
    /// a growth override is given), [`PredictionError::InvalidTarget`] or
    /// [`PredictionError::InvalidWindow`] when the window leaves the
    /// representable date range.
    pub fn new(
        store: &'a Store,
        subject: SubjectId,
        target: Target,
        options: &PredictionOptions,
        now: DateTime<Utc>,
    ) -> Result<Self, PredictionError> {
        let window_start = days_before(now, options.window_days.max(1))
            .ok_or(PredictionError::InvalidWindow(options.window_days))?;

        let (current, rate_per_day) = match options.growth_override {
            Some(rate) => {
                let records = store.records_for(subject, Some(window_start), None)?;
                let last = records.last().ok_or(PredictionError::NoData(subject))?;
                (last.value, rate)
            }
            None => {
                let trend = trend(store, subject, window_start)?;
                (trend.current, trend.rate_per_day)
            }
        };

        let target = resolve(target, current)?;
        if target == Target::Subject(subject) {
            return Err(PredictionError::InvalidTarget(
                "cannot target yourself".to_string(),
            ));
        }

        debug!(%subject, %target, current, rate_per_day, "prediction prepared");
        Ok(Self {
            store,
            subject,
            target,
            current,
            rate_per_day,
            window_start,
            max_target_days: options.max_target_days,
        })
    }

    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub const fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Days until the target is met.
    ///
    /// # Errors
    ///
    /// [`PredictionError::TargetBounds`] for distant or undefined results;
    /// [`PredictionError::NoData`] or [`PredictionError::ZeroGrowth`] when a
    /// target subject has no usable trend.
    pub fn evaluate(&self) -> Result<Projection, PredictionError> {
        let (days, target_xp) = match &self.target {
            Target::Xp(xp) => (self.fixed(*xp), *xp),
            Target::Level(level) => {
                let xp = level_to_xp(*level);
                (self.fixed(xp), xp)
            }
            Target::Subject(other) => {
                let other_trend = trend(self.store, *other, self.window_start)?;
                #[allow(clippy::cast_precision_loss)]
                let gap = (other_trend.current - self.current) as f64;
                (
                    gap / (self.rate_per_day - other_trend.rate_per_day),
                    other_trend.current,
                )
            }
            Target::Relative(_) => {
                return Err(PredictionError::InvalidTarget(self.target.to_string()));
            }
        };

        if !days.is_finite() || days.abs() > self.max_target_days {
            return Err(PredictionError::TargetBounds {
                days,
                limit: self.max_target_days,
            });
        }

        Ok(Projection {
            days,
            rate_per_day: self.rate_per_day,
            current: self.current,
            target: self.target.clone(),
            target_xp,
        })
    }

    fn fixed(&self, target_xp: i64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let gap = (target_xp - self.current) as f64;
        gap / self.rate_per_day
    }
}

fn resolve(target: Target, current: i64) -> Result<Target, PredictionError> {
    match target {
        Target::Relative(inner) => match *inner {
            Target::Xp(offset) => Ok(Target::Xp(current.saturating_add(offset))),
            Target::Level(offset) => {
                let level = xp_to_level(current) + offset;
                if (0..=MAX_LEVEL).contains(&level) {
                    Ok(Target::Level(level))
                } else {
                    Err(PredictionError::InvalidTarget(format!(
                        "level {level} is out of range"
                    )))
                }
            }
            other => Err(PredictionError::InvalidTarget(format!(
                "relative {other}"
            ))),
        },
        absolute => Ok(absolute),
    }
}
