//! Collector -> store -> reducer/predictor/ranker against an on-disk database.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use xptrack_core::api::{FetchError, LeaderboardPage, LeaderboardSource};
use xptrack_core::collector::{CollectError, Collector};
use xptrack_core::db::{Denylist, Store};
use xptrack_core::model::SubjectId;
use xptrack_core::predictor::{Prediction, PredictionOptions, Target};
use xptrack_core::reducer::{ReductionState, Reducer};
use xptrack_core::retry::RetryPolicy;
use xptrack_core::truerank::Truerank;

/// Serves scripted pages; values can be bumped between cycles.
#[derive(Default)]
struct ScriptedLeaderboard {
    xp: RefCell<HashMap<i64, i64>>,
    broken_pages: Vec<u32>,
}

impl ScriptedLeaderboard {
    fn new(subjects: &[(i64, i64)]) -> Self {
        Self {
            xp: RefCell::new(subjects.iter().copied().collect()),
            broken_pages: Vec::new(),
        }
    }

    fn grow(&self, id: i64, by: i64) {
        *self.xp.borrow_mut().entry(id).or_default() += by;
    }
}

impl LeaderboardSource for ScriptedLeaderboard {
    fn fetch_page(&self, page: u32) -> Result<LeaderboardPage, FetchError> {
        if self.broken_pages.contains(&page) {
            return Err(FetchError::Transport("connection reset".to_string()));
        }
        if page != 1 {
            return Ok(LeaderboardPage::default());
        }
        let mut ids: Vec<_> = self.xp.borrow().iter().map(|(k, v)| (*k, *v)).collect();
        ids.sort_unstable();
        let entries: Vec<String> = ids
            .iter()
            .map(|(id, xp)| {
                format!(r##"{{"id": "{id}", "xp": {xp}, "color": "#336699", "nickname": "user{id}"}}"##)
            })
            .collect();
        let body = format!(r#"{{"leaderboard": [{}]}}"#, entries.join(","));
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn open_store(dir: &tempfile::TempDir) -> Store {
    Store::open(&dir.path().join("xptrack.sqlite3"), Denylist::default()).expect("open store")
}

#[test]
fn failed_page_blocks_commit_and_leaves_latest_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let mut source = ScriptedLeaderboard::new(&[(1, 100), (2, 200), (3, 300), (4, 400), (5, 500)]);

    let collector = Collector::new(&store, &source, RetryPolicy::immediate(5));
    collector
        .record_data_at([1], Duration::minutes(30), start())
        .expect("first cycle");
    assert_eq!(store.latest_timestamp().unwrap(), Some(start()));

    source.broken_pages = vec![2];
    let collector = Collector::new(&store, &source, RetryPolicy::immediate(5));
    let err = collector
        .record_data_at([1, 2], Duration::minutes(30), start() + Duration::hours(1))
        .unwrap_err();
    match err {
        CollectError::ManyFailures {
            successes,
            failures,
        } => assert_eq!((successes, failures), (5, 100)),
        other => panic!("expected ManyFailures, got {other}"),
    }
    assert_eq!(store.latest_timestamp().unwrap(), Some(start()));
    assert_eq!(store.record_count().unwrap(), 5);
}

#[test]
fn a_month_of_collection_feeds_every_reader() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let source = ScriptedLeaderboard::new(&[(1, 1_000), (2, 50_000), (3, 20_000)]);
    let collector = Collector::new(&store, &source, RetryPolicy::immediate(1));

    // Hourly cycles for 30 days; subject 1 gains 10/hour, subject 3 stalls.
    let hours = 30 * 24;
    for hour in 0..hours {
        if hour > 0 {
            source.grow(1, 10);
            source.grow(2, 5);
        }
        collector
            .record_data_at([1], Duration::minutes(30), start() + Duration::hours(hour))
            .expect("hourly cycle");
    }
    let now = start() + Duration::hours(hours - 1);
    let before = store.record_count().unwrap();
    assert_eq!(before, 3 * 720);

    // Ranking over the last week: the stalled subject is inactive.
    let rank = Truerank::for_days(&store, 7, 30, now).unwrap();
    let ids: Vec<i64> = rank.entries().iter().map(|e| e.subject.id.get()).collect();
    assert_eq!(ids, vec![2, 1]);
    let position = rank.find_index(SubjectId::new(1)).unwrap();
    assert_eq!(position.rank, 1);
    assert!(position.gap().unwrap() > 0);

    // Subject 1 grows 240/day; reaching +2400 takes ten days.
    let prediction = Prediction::new(
        &store,
        SubjectId::new(1),
        "+2400xp".parse::<Target>().unwrap(),
        &PredictionOptions::default(),
        now,
    )
    .unwrap();
    let projection = prediction.evaluate().unwrap();
    assert!((projection.days - 10.0).abs() < 1e-6, "{}", projection.days);

    // Compacting a week later thins out the flat subject's first days.
    let later = now + Duration::days(7);
    let mut reduction = Reducer::new(&store, 200).reduce(later).unwrap();
    assert!(reduction.pending() > 0);
    let deleted = reduction.commit(&store).unwrap();
    assert_eq!(reduction.state(), ReductionState::Confirmed);
    assert_eq!(store.record_count().unwrap(), before - deleted);

    for id in [1, 2, 3] {
        let history = store.history(SubjectId::new(id)).unwrap();
        assert_eq!(history.first().unwrap().timestamp, start(), "first kept");
        assert_eq!(history.last().unwrap().timestamp, now, "last kept");
    }
}

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir);
        let source = ScriptedLeaderboard::new(&[(9, 900)]);
        Collector::new(&store, &source, RetryPolicy::immediate(1))
            .record_data_at([1], Duration::minutes(30), start())
            .unwrap();
    }
    let store = open_store(&dir);
    let subject = store.subject(SubjectId::new(9)).unwrap().unwrap();
    assert_eq!(subject.display_name.as_deref(), Some("user9"));
    assert_eq!(store.latest_timestamp().unwrap(), Some(start()));
}
