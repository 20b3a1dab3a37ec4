//! Leaderboard of recently active subjects.
//!
//! Only subjects whose XP grew by more than a threshold inside the window are
//! ranked; dormant accounts drop out, so a subject's position reflects the
//! people they are actually competing with.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::db::{Store, StoreError};
use crate::error::ErrorCode;
use crate::model::{Subject, SubjectId, days_before};

/// Candidates considered, taken from the top of the all-time leaderboard.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 200;

/// Default minimum in-window growth (exclusive).
pub const DEFAULT_THRESHOLD: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("{0} is not on the active leaderboard")]
    NotFound(SubjectId),

    #[error("invalid ranking window of {0} days")]
    InvalidWindow(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RankError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotActive,
            Self::InvalidWindow(_) => ErrorCode::InvalidArgument,
            Self::Store(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    pub subject: Subject,
    /// Last in-window value.
    pub xp: i64,
    /// Growth inside the window.
    pub growth: i64,
}

/// A subject's position plus the entry directly above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankPosition {
    /// 0-based.
    pub rank: usize,
    pub entry: RankEntry,
    pub ahead: Option<RankEntry>,
}

impl RankPosition {
    /// XP needed to draw level with the entry above.
    #[must_use]
    pub fn gap(&self) -> Option<i64> {
        self.ahead.as_ref().map(|ahead| ahead.xp - self.entry.xp)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Truerank {
    window_start: DateTime<Utc>,
    threshold: i64,
    entries: Vec<RankEntry>,
}

impl Truerank {
    /// Rank subjects active over the last `days` days.
    ///
    /// # Errors
    ///
    /// [`RankError::InvalidWindow`] for a non-positive or unrepresentable
    /// window, or a store
    /// error.
    pub fn for_days(
        store: &Store,
        days: i64,
        threshold: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, RankError> {
        let window_start = (days > 0)
            .then(|| days_before(now, days))
            .flatten()
            .ok_or(RankError::InvalidWindow(days))?;
        Self::build(store, window_start, threshold, DEFAULT_CANDIDATE_LIMIT)
    }

    /// Rank the top `limit` subjects by value, keeping those with at least two
    /// in-window records and in-window growth strictly above `threshold`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn build(
        store: &Store,
        window_start: DateTime<Utc>,
        threshold: i64,
        limit: usize,
    ) -> Result<Self, RankError> {
        let candidates =
            store.top_by_current_value(Some(limit), None, Some(window_start), None)?;
        let considered = candidates.len();

        let mut entries: Vec<RankEntry> = candidates
            .into_iter()
            .filter(|series| series.points.len() >= 2)
            .filter_map(|series| {
                let growth = series.growth();
                let xp = series.last()?.value;
                (growth > threshold).then(|| RankEntry {
                    subject: series.subject,
                    xp,
                    growth,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.subject.id.cmp(&b.subject.id)));

        debug!(
            considered,
            active = entries.len(),
            threshold,
            "active leaderboard built"
        );
        Ok(Self {
            window_start,
            threshold,
            entries,
        })
    }

    #[must_use]
    pub fn entries(&self) -> &[RankEntry] {
        &self.entries
    }

    #[must_use]
    pub const fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    #[must_use]
    pub const fn threshold(&self) -> i64 {
        self.threshold
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of `id`, with the neighbour directly above.
    ///
    /// # Errors
    ///
    /// [`RankError::NotFound`] when `id` is not active.
    pub fn find_index(&self, id: SubjectId) -> Result<RankPosition, RankError> {
        let rank = self
            .entries
            .iter()
            .position(|entry| entry.subject.id == id)
            .ok_or(RankError::NotFound(id))?;

        Ok(RankPosition {
            rank,
            entry: self.entries[rank].clone(),
            ahead: rank.checked_sub(1).map(|above| self.entries[above].clone()),
        })
    }

    /// Entries on 1-based page `page` of `size` rows.
    #[must_use]
    pub fn page(&self, page: usize, size: usize) -> &[RankEntry] {
        let size = size.max(1);
        let start = page.saturating_sub(1).saturating_mul(size);
        if start >= self.entries.len() {
            return &[];
        }
        let end = (start + size).min(self.entries.len());
        &self.entries[start..end]
    }

    #[must_use]
    pub fn page_count(&self, size: usize) -> usize {
        self.entries.len().div_ceil(size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Denylist;
    use crate::db::store::ProfileUpdate;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()
    }

    fn seed(store: &Store, id: i64, points: &[(i64, i64)]) {
        store
            .write(|pass| {
                pass.upsert_subject(
                    SubjectId::new(id),
                    &ProfileUpdate {
                        name: Some(&format!("user{id}")),
                        ..ProfileUpdate::default()
                    },
                )?;
                for (days_ago, value) in points {
                    pass.insert_record(SubjectId::new(id), now() - Duration::days(*days_ago), *value)?;
                }
                Ok(())
            })
            .unwrap();
    }

    fn ranked() -> (Store, Truerank) {
        let store = Store::in_memory(Denylist::default()).unwrap();
        seed(&store, 1, &[(5, 10_000), (1, 10_030)]); // growth == threshold
        seed(&store, 2, &[(5, 8_000), (1, 8_031)]); // one above
        seed(&store, 3, &[(5, 9_000), (1, 9_500)]);
        seed(&store, 4, &[(1, 50_000)]); // single point
        seed(&store, 5, &[(60, 1), (40, 100_000)]); // only outside window
        seed(&store, 6, &[(6, 500), (2, 900)]);
        let rank = Truerank::for_days(&store, 7, 30, now()).unwrap();
        (store, rank)
    }

    #[test]
    fn threshold_is_exclusive_and_order_is_by_current_xp() {
        let (_store, rank) = ranked();
        let ids: Vec<i64> = rank.entries().iter().map(|e| e.subject.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 6]);
        assert_eq!(rank.entries()[1].growth, 31);
    }

    #[test]
    fn find_index_reports_the_neighbour_above() {
        let (_store, rank) = ranked();

        let top = rank.find_index(SubjectId::new(3)).unwrap();
        assert_eq!(top.rank, 0);
        assert!(top.ahead.is_none());
        assert_eq!(top.gap(), None);

        let second = rank.find_index(SubjectId::new(2)).unwrap();
        assert_eq!(second.rank, 1);
        assert_eq!(second.ahead.as_ref().unwrap().subject.id, SubjectId::new(3));
        assert_eq!(second.gap(), Some(9_500 - 8_031));

        let err = rank.find_index(SubjectId::new(1)).unwrap_err();
        assert!(matches!(err, RankError::NotFound(_)));
        assert_eq!(err.code(), ErrorCode::NotActive);
    }

    #[test]
    fn pages_slice_the_active_list() {
        let (_store, rank) = ranked();
        assert_eq!(rank.page(1, 2).len(), 2);
        assert_eq!(rank.page(2, 2).len(), 1);
        assert!(rank.page(3, 2).is_empty());
        assert_eq!(rank.page_count(2), 2);
    }

    #[test]
    fn non_positive_window_is_rejected() {
        let store = Store::in_memory(Denylist::default()).unwrap();
        assert!(matches!(
            Truerank::for_days(&store, 0, 30, now()).unwrap_err(),
            RankError::InvalidWindow(0)
        ));
        assert!(matches!(
            Truerank::for_days(&store, 999_999_999_999, 30, now()).unwrap_err(),
            RankError::InvalidWindow(999_999_999_999)
        ));
    }
}
