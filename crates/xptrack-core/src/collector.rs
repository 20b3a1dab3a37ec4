//! Failure-tolerant ingestion from a paginated leaderboard.
//!
//! A cycle runs `gate -> fetch pages -> validate -> upsert -> commit` inside
//! one [`WritePass`]. Individual page and entry failures are tallied, not
//! raised; the tally decides whether the pass is committed at all.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::{LeaderboardEntry, LeaderboardPage, LeaderboardSource};
use crate::db::store::ProfileUpdate;
use crate::db::{Store, StoreError, WritePass};
use crate::error::ErrorCode;
use crate::retry::RetryPolicy;

/// Failure weight charged for a page that could not be fetched at all.
pub const PAGE_FAILURE_WEIGHT: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(
        "too soon: {}/{} minutes since the last collection",
        .elapsed.num_minutes(),
        .required.num_minutes()
    )]
    TooSoon { elapsed: Duration, required: Duration },

    #[error("too many failures: {successes} saved, {failures} failed; nothing was committed")]
    ManyFailures { successes: u32, failures: u32 },

    #[error("commit failed after {attempts} attempt(s): {source}")]
    Commit {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollectError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TooSoon { .. } => ErrorCode::TooSoon,
            Self::ManyFailures { .. } => ErrorCode::ManyFailures,
            Self::Commit { .. } => ErrorCode::CommitFailed,
            Self::Store(err) => err.code(),
        }
    }
}

/// Tallies for one collection or profile-refresh pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub pages_requested: u32,
    pub pages_failed: u32,
    pub successes: u32,
    pub failures: u32,
    pub skipped: u32,
}

impl CycleReport {
    const fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            pages_requested: 0,
            pages_failed: 0,
            successes: 0,
            failures: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Saved,
    Skipped,
    Failed,
}

/// Drives ingestion cycles against a store.
#[derive(Debug)]
pub struct Collector<'a, S> {
    store: &'a Store,
    source: &'a S,
    retry: RetryPolicy,
}

impl<'a, S: LeaderboardSource> Collector<'a, S> {
    #[must_use]
    pub const fn new(store: &'a Store, source: &'a S, retry: RetryPolicy) -> Self {
        Self {
            store,
            source,
            retry,
        }
    }

    /// Run one collection cycle stamped with the current time.
    ///
    /// # Errors
    ///
    /// See [`Collector::record_data_at`].
    pub fn record_data(
        &self,
        pages: impl IntoIterator<Item = u32>,
        min_separation: Duration,
    ) -> Result<CycleReport, CollectError> {
        self.record_data_at(pages, min_separation, Utc::now())
    }

    /// Run one collection cycle; every record is stamped `now`.
    ///
    /// # Errors
    ///
    /// - [`CollectError::TooSoon`] if the last collection is younger than
    ///   `min_separation` (nothing is written)
    /// - [`CollectError::ManyFailures`] if successes do not outnumber
    ///   failures (the pass is rolled back)
    /// - [`CollectError::Commit`] if every commit attempt failed
    pub fn record_data_at(
        &self,
        pages: impl IntoIterator<Item = u32>,
        min_separation: Duration,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, CollectError> {
        info!(at = %now, "starting data collection");

        if let Some(last) = self.store.latest_timestamp()? {
            let elapsed = now - last;
            if elapsed < min_separation {
                info!(
                    elapsed_minutes = elapsed.num_minutes(),
                    required_minutes = min_separation.num_minutes(),
                    "too soon for another collection"
                );
                return Err(CollectError::TooSoon {
                    elapsed,
                    required: min_separation,
                });
            }
        }

        let mut pass = self.store.begin_pass()?;
        let report = self.ingest_pages(&pass, pages, now, Some(now));

        if report.successes <= report.failures {
            error!(
                successes = report.successes,
                failures = report.failures,
                "considerable record save failures; rolling back"
            );
            if let Err(err) = pass.rollback() {
                warn!(error = %err, "rollback after failed cycle did not complete");
            }
            return Err(CollectError::ManyFailures {
                successes: report.successes,
                failures: report.failures,
            });
        }

        self.commit(&mut pass)?;
        info!(
            successes = report.successes,
            failures = report.failures,
            skipped = report.skipped,
            "saved the latest data"
        );
        Ok(report)
    }

    /// Refresh display profiles without writing records or checking the gate.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::Commit`] if every commit attempt failed.
    pub fn update_profiles(
        &self,
        pages: impl IntoIterator<Item = u32>,
    ) -> Result<CycleReport, CollectError> {
        let now = Utc::now();
        info!("starting profile refresh");

        let mut pass = self.store.begin_pass()?;
        let report = self.ingest_pages(&pass, pages, now, None);
        self.commit(&mut pass)?;

        info!(
            updated = report.successes,
            failures = report.failures,
            "profiles refreshed"
        );
        Ok(report)
    }

    fn ingest_pages(
        &self,
        pass: &WritePass<'_>,
        pages: impl IntoIterator<Item = u32>,
        now: DateTime<Utc>,
        record_at: Option<DateTime<Utc>>,
    ) -> CycleReport {
        let mut report = CycleReport::new(now);
        let mut seen = HashSet::new();

        for page in pages {
            report.pages_requested += 1;
            let Some(body) = self.fetch(page) else {
                report.pages_failed += 1;
                report.failures += PAGE_FAILURE_WEIGHT;
                continue;
            };

            for entry in &body.leaderboard {
                match self.ingest_entry(pass, entry, record_at, &mut seen) {
                    Outcome::Saved => report.successes += 1,
                    Outcome::Skipped => report.skipped += 1,
                    Outcome::Failed => report.failures += 1,
                }
            }
            debug!(page, entries = body.leaderboard.len(), "page collected");
        }
        report
    }

    fn fetch(&self, page: u32) -> Option<LeaderboardPage> {
        match self
            .retry
            .run("fetch leaderboard page", |_| self.source.fetch_page(page))
        {
            Ok(body) => Some(body),
            Err(exhausted) => {
                error!(
                    page,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "skipping page after max retries"
                );
                None
            }
        }
    }

    fn ingest_entry(
        &self,
        pass: &WritePass<'_>,
        entry: &LeaderboardEntry,
        record_at: Option<DateTime<Utc>>,
        seen: &mut HashSet<crate::model::SubjectId>,
    ) -> Outcome {
        if !entry.is_ingestible() {
            return Outcome::Skipped;
        }
        let (Some(id), Some(xp)) = (entry.subject_id(), entry.xp) else {
            warn!(id = ?entry.id, "skipping entry with missing id or xp");
            return Outcome::Failed;
        };
        if !seen.insert(id) {
            debug!(subject = %id, "subject already written this cycle");
            return Outcome::Skipped;
        }

        let update = ProfileUpdate {
            name: entry.name(),
            color: entry.color.as_deref(),
            avatar: entry.avatar.as_deref(),
            recent_colors: None,
        };
        let written = self.retry.run_if(
            "write subject",
            |_| {
                pass.atomically(|pass| {
                    pass.upsert_subject(id, &update)?;
                    if let Some(at) = record_at {
                        pass.insert_record(id, at, xp)?;
                    }
                    Ok(())
                })
            },
            StoreError::is_transient,
        );

        match written {
            Ok(()) => Outcome::Saved,
            Err(exhausted) => {
                error!(
                    subject = %id,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "skipping subject"
                );
                Outcome::Failed
            }
        }
    }

    fn commit(&self, pass: &mut WritePass<'_>) -> Result<(), CollectError> {
        self.retry
            .run("commit write pass", |_| pass.commit())
            .map_err(|exhausted| CollectError::Commit {
                attempts: exhausted.attempts,
                source: exhausted.last,
            })
    }
}

/// When data was last collected and whether collection looks halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Liveness {
    pub last: Option<DateTime<Utc>>,
    /// The collection before `last`, if it happened within the past day.
    pub previous: Option<DateTime<Utc>>,
    pub halted: bool,
}

/// Collection is considered halted once the newest record is older than
/// 110% of the maximum expected gap between cycles.
///
/// # Errors
///
/// Returns an error if the store cannot be queried.
pub fn liveness(
    store: &Store,
    now: DateTime<Utc>,
    max_separation: Duration,
) -> Result<Liveness, StoreError> {
    let last = store.latest_timestamp()?;
    let recent = store.timestamps_in_range(Some(now - Duration::days(1)), None)?;
    let previous = recent.len().checked_sub(2).map(|idx| recent[idx]);
    let tolerance = max_separation + max_separation / 10;
    let halted = last.is_none_or(|last| now - last >= tolerance);

    Ok(Liveness {
        last,
        previous,
        halted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FetchError;
    use crate::db::Denylist;
    use crate::model::SubjectId;
    use chrono::TimeZone;
    use std::cell::Cell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSource {
        pages: HashMap<u32, LeaderboardPage>,
        calls: Cell<u32>,
    }

    impl FakeSource {
        fn with_page(mut self, page: u32, json: &str) -> Self {
            self.pages
                .insert(page, serde_json::from_str(json).expect("page json"));
            self
        }
    }

    impl LeaderboardSource for FakeSource {
        fn fetch_page(&self, page: u32) -> Result<LeaderboardPage, FetchError> {
            self.calls.set(self.calls.get() + 1);
            self.pages
                .get(&page)
                .cloned()
                .ok_or(FetchError::Status(503))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn store() -> Store {
        Store::in_memory(Denylist::default()).unwrap()
    }

    const PAGE_ONE: &str = r##"{"leaderboard": [
        {"id": 1, "xp": 100, "color": "#ff0000", "nickname": "one"},
        {"id": 2, "xp": 200, "color": "#00ff00", "username": "two"},
        {"id": 3, "xp": 300, "color": "#0000ff"},
        {"id": 4, "xp": 400, "color": "#000000"},
        {"id": 5, "xp": 500, "color": "#abcdef", "missing": true},
        {"xp": 600, "color": "#abcdef"}
    ]}"##;

    #[test]
    fn cycle_saves_valid_entries_and_tallies_the_rest() {
        let store = store();
        let source = FakeSource::default().with_page(1, PAGE_ONE);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(3));

        let report = collector
            .record_data_at([1], Duration::minutes(30), t0())
            .expect("cycle succeeds");
        assert_eq!(report.successes, 3);
        assert_eq!(report.failures, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.latest_timestamp().unwrap(), Some(t0()));
        assert_eq!(
            store
                .subject(SubjectId::new(1))
                .unwrap()
                .unwrap()
                .display_name
                .as_deref(),
            Some("one")
        );
        assert!(store.subject(SubjectId::new(4)).unwrap().is_none());
    }

    #[test]
    fn gate_rejects_just_before_separation_and_accepts_just_after() {
        let store = store();
        let source = FakeSource::default().with_page(1, PAGE_ONE);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(1));
        let sep = Duration::minutes(30);
        collector.record_data_at([1], sep, t0()).unwrap();

        let early = t0() + sep - Duration::seconds(1);
        let err = collector.record_data_at([1], sep, early).unwrap_err();
        assert!(matches!(err, CollectError::TooSoon { .. }));
        assert_eq!(err.code(), ErrorCode::TooSoon);
        assert_eq!(store.latest_timestamp().unwrap(), Some(t0()));

        let late = t0() + sep + Duration::seconds(1);
        collector.record_data_at([1], sep, late).unwrap();
        assert_eq!(store.latest_timestamp().unwrap(), Some(late));
    }

    #[test]
    fn failed_page_outweighs_successes_and_rolls_back() {
        let store = store();
        let source = FakeSource::default().with_page(1, PAGE_ONE);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(2));

        let err = collector
            .record_data_at([1, 2], Duration::minutes(30), t0())
            .unwrap_err();
        assert!(matches!(
            err,
            CollectError::ManyFailures {
                successes: 3,
                failures: 101
            }
        ));
        assert_eq!(source.calls.get(), 1 + 2, "failed page is retried");
        assert_eq!(store.latest_timestamp().unwrap(), None);
        assert!(store.subjects().unwrap().is_empty());
    }

    #[test]
    fn duplicate_subject_across_pages_is_written_once() {
        let store = store();
        let source = FakeSource::default()
            .with_page(1, r##"{"leaderboard": [{"id": 9, "xp": 10, "color": "#111111"}]}"##)
            .with_page(2, r##"{"leaderboard": [{"id": 9, "xp": 11, "color": "#111111"}]}"##);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(1));

        let report = collector
            .record_data_at([1, 2], Duration::minutes(30), t0())
            .unwrap();
        assert_eq!((report.successes, report.skipped), (1, 1));
        let records = store.records_for(SubjectId::new(9), None, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 10);
    }

    const TRIO: &str = r##"{"leaderboard": [
        {"id": 1, "xp": 110, "color": "#ff0000", "nickname": "one"},
        {"id": 2, "xp": 210, "color": "#00ff00", "nickname": "two"},
        {"id": 3, "xp": 310, "color": "#0000ff", "nickname": "three"}
    ]}"##;

    #[test]
    fn commit_exhaustion_is_fatal_and_persists_nothing() {
        let store = store();
        let source = FakeSource::default().with_page(1, TRIO);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(3));
        collector
            .record_data_at([1], Duration::minutes(30), t0())
            .expect("first cycle commits");
        let records_before = store.record_count().unwrap();

        // Orphan every new record so the deferred foreign key rejects COMMIT.
        store
            .connection()
            .execute_batch(
                "CREATE TEMP TRIGGER orphan_records AFTER INSERT ON main.records \
                 BEGIN DELETE FROM profiles WHERE id = NEW.id; END;",
            )
            .unwrap();

        let later = t0() + Duration::hours(1);
        let err = collector
            .record_data_at([1], Duration::minutes(30), later)
            .unwrap_err();
        assert!(
            matches!(err, CollectError::Commit { attempts: 3, .. }),
            "unexpected error: {err:?}"
        );
        assert_eq!(err.code(), ErrorCode::CommitFailed);

        store
            .connection()
            .execute_batch("DROP TRIGGER temp.orphan_records")
            .unwrap();
        assert_eq!(store.latest_timestamp().unwrap(), Some(t0()));
        assert_eq!(store.record_count().unwrap(), records_before);
        assert_eq!(store.subjects().unwrap().len(), 3);
    }

    #[test]
    fn duplicate_record_undoes_the_profile_write() {
        let store = store();
        store
            .write(|pass| {
                pass.upsert_subject(
                    SubjectId::new(1),
                    &ProfileUpdate {
                        name: Some("old"),
                        ..ProfileUpdate::default()
                    },
                )?;
                pass.insert_record(SubjectId::new(1), t0(), 100)
            })
            .unwrap();

        let source = FakeSource::default().with_page(1, TRIO);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(3));
        let report = collector
            .record_data_at([1], Duration::zero(), t0())
            .expect("two of three subjects save");
        assert_eq!(report.successes, 2);
        assert_eq!(report.failures, 1);

        let first = store.subject(SubjectId::new(1)).unwrap().unwrap();
        assert_eq!(first.display_name.as_deref(), Some("old"));
        let kept = store.records_for(SubjectId::new(1), None, None).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].value, 100);
        assert_eq!(store.record_count().unwrap(), 3);
    }

    #[test]
    fn profile_refresh_writes_no_records_and_ignores_gate() {
        let store = store();
        let source = FakeSource::default().with_page(1, PAGE_ONE);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(1));

        let report = collector.update_profiles([1, 2]).unwrap();
        assert_eq!(report.successes, 3);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(store.subjects().unwrap().len(), 3);
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn liveness_reports_previous_and_halt() {
        let store = store();
        let source = FakeSource::default().with_page(1, PAGE_ONE);
        let collector = Collector::new(&store, &source, RetryPolicy::immediate(1));
        let max = Duration::minutes(120);

        let empty = liveness(&store, t0(), max).unwrap();
        assert!(empty.halted);
        assert_eq!(empty.last, None);

        collector.record_data_at([1], Duration::zero(), t0()).unwrap();
        let second = t0() + Duration::hours(1);
        collector.record_data_at([1], Duration::zero(), second).unwrap();

        let alive = liveness(&store, second + Duration::minutes(10), max).unwrap();
        assert_eq!(alive.last, Some(second));
        assert_eq!(alive.previous, Some(t0()));
        assert!(!alive.halted);

        let stale = liveness(&store, second + Duration::minutes(133), max).unwrap();
        assert!(stale.halted);
    }
}
