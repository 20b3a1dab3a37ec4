//! Retention compaction: drop interior samples that add no trend shape.
//!
//! Planning is pure ([`select_redundant`]) and produces a [`Reduction`] in
//! state `Planned`. Nothing is deleted until the reduction is explicitly
//! committed, so an operator can inspect the count first.
//!
//! The scan walks each series with a `(previous kept, current, next)` window.
//! `current` is dropped when any [`CompactionRule`] matches; otherwise it
//! becomes the new `previous`. The first and last record are never candidates.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Store, StoreError};
use crate::error::ErrorCode;
use crate::model::{Record, RecordKey};

/// Subjects with this many records or fewer are left alone.
pub const MIN_RECORDS: usize = 3;

/// Default XP delta under which neighbouring samples are redundant.
pub const DEFAULT_SAFE_THRESHOLD: i64 = 200;

/// How much the value may change across the `(previous, next)` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaLimit {
    Below(i64),
    Flat,
}

/// Drop `current` when it is older than `min_age`, its neighbours are less
/// than `max_span` apart, and the value change across them fits `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionRule {
    pub min_age: Duration,
    pub max_span: Duration,
    pub delta: DeltaLimit,
}

impl CompactionRule {
    fn matches(&self, age: Duration, span: Duration, delta: i64) -> bool {
        let delta_ok = match self.delta {
            DeltaLimit::Below(limit) => delta < limit,
            DeltaLimit::Flat => delta == 0,
        };
        age > self.min_age && span < self.max_span && delta_ok
    }
}

/// The standard retention ladder.
#[must_use]
pub fn default_rules(safe_threshold: i64) -> Vec<CompactionRule> {
    vec![
        CompactionRule {
            min_age: Duration::days(30),
            max_span: Duration::hours(3),
            delta: DeltaLimit::Below(safe_threshold),
        },
        CompactionRule {
            min_age: Duration::days(365),
            max_span: Duration::hours(6),
            delta: DeltaLimit::Below(safe_threshold),
        },
        CompactionRule {
            min_age: Duration::days(7),
            max_span: Duration::hours(12),
            delta: DeltaLimit::Flat,
        },
    ]
}

/// Keys of the interior records in `records` (ascending) that `rules` drop.
#[must_use]
pub fn select_redundant(
    records: &[Record],
    now: DateTime<Utc>,
    rules: &[CompactionRule],
) -> Vec<RecordKey> {
    let mut redundant = Vec::new();
    let Some(first) = records.first() else {
        return redundant;
    };

    let mut previous = first;
    for window in records.windows(2).skip(1) {
        let (current, next) = (&window[0], &window[1]);
        let span = next.timestamp - previous.timestamp;
        let delta = next.value - previous.value;
        let age = now - current.timestamp;

        if delta < 0 {
            warn!(
                subject = %current.subject_id,
                previous = previous.value,
                current = current.value,
                next = next.value,
                "value decreased across compaction window"
            );
        }

        if rules.iter().any(|rule| rule.matches(age, span, delta)) {
            redundant.push(RecordKey::from(current));
        } else {
            previous = current;
        }
    }
    redundant
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionState {
    Planned,
    Confirmed,
    Aborted,
}

impl fmt::Display for ReductionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planned => "planned",
            Self::Confirmed => "confirmed",
            Self::Aborted => "aborted",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("cannot move a {from} reduction to {to}")]
    InvalidTransition {
        from: ReductionState,
        to: ReductionState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReduceError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::Store(err) => err.code(),
        }
    }
}

/// A computed deletion set awaiting confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct Reduction {
    state: ReductionState,
    planned_at: DateTime<Utc>,
    subjects_scanned: usize,
    deletions: Vec<RecordKey>,
    deleted: usize,
}

impl Reduction {
    #[must_use]
    pub const fn state(&self) -> ReductionState {
        self.state
    }

    #[must_use]
    pub fn deletions(&self) -> &[RecordKey] {
        &self.deletions
    }

    #[must_use]
    pub const fn pending(&self) -> usize {
        self.deletions.len()
    }

    /// Rows actually removed by [`Reduction::commit`].
    #[must_use]
    pub const fn deleted(&self) -> usize {
        self.deleted
    }

    #[must_use]
    pub const fn subjects_scanned(&self) -> usize {
        self.subjects_scanned
    }

    #[must_use]
    pub const fn planned_at(&self) -> DateTime<Utc> {
        self.planned_at
    }

    /// Delete the planned records in one write pass.
    ///
    /// On a storage error nothing is deleted and the reduction stays
    /// `Planned`.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::InvalidTransition`] unless `Planned`, or the
    /// storage error that aborted the pass.
    pub fn commit(&mut self, store: &Store) -> Result<usize, ReduceError> {
        self.transition(ReductionState::Confirmed)?;

        let deleted = store.write(|pass| {
            let mut deleted = 0;
            for key in &self.deletions {
                if pass.delete_record(key)? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })?;

        self.state = ReductionState::Confirmed;
        self.deleted = deleted;
        info!(deleted, "reduction committed");
        Ok(deleted)
    }

    /// Discard the plan.
    ///
    /// # Errors
    ///
    /// Returns [`ReduceError::InvalidTransition`] unless `Planned`.
    pub fn rollback(&mut self) -> Result<(), ReduceError> {
        self.transition(ReductionState::Aborted)?;
        self.state = ReductionState::Aborted;
        info!(discarded = self.deletions.len(), "reduction aborted");
        Ok(())
    }

    fn transition(&self, to: ReductionState) -> Result<(), ReduceError> {
        if self.state == ReductionState::Planned {
            Ok(())
        } else {
            Err(ReduceError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }
}

/// Plans compaction over every subject in a store.
#[derive(Debug)]
pub struct Reducer<'a> {
    store: &'a Store,
    rules: Vec<CompactionRule>,
}

impl<'a> Reducer<'a> {
    #[must_use]
    pub fn new(store: &'a Store, safe_threshold: i64) -> Self {
        Self::with_rules(store, default_rules(safe_threshold))
    }

    #[must_use]
    pub const fn with_rules(store: &'a Store, rules: Vec<CompactionRule>) -> Self {
        Self { store, rules }
    }

    /// Compute the deletion set as of `now`; nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn reduce(&self, now: DateTime<Utc>) -> Result<Reduction, ReduceError> {
        let subjects = self.store.subjects()?;
        let mut deletions = Vec::new();

        for subject in &subjects {
            let history = self.store.history(subject.id)?;
            if history.len() <= MIN_RECORDS {
                continue;
            }
            let redundant = select_redundant(&history, now, &self.rules);
            debug!(
                subject = %subject.id,
                records = history.len(),
                redundant = redundant.len(),
                "subject scanned"
            );
            deletions.extend(redundant);
        }

        info!(
            subjects = subjects.len(),
            pending = deletions.len(),
            "reduction planned"
        );
        Ok(Reduction {
            state: ReductionState::Planned,
            planned_at: now,
            subjects_scanned: subjects.len(),
            deletions,
            deleted: 0,
        })
    }
}
