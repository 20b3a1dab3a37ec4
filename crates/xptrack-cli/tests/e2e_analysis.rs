//! E2E CLI tests for the read side and compaction:
//! - `xpt top` by XP and by growth
//! - `xpt rank` pages and single-subject positions
//! - `xpt predict` projections and typed failures
//! - `xpt reduce` dry run versus `--yes`
//! - `xpt profiles --list`
//!
//! The store is seeded directly through `xptrack-core`, relative to the
//! current time, so the binary sees realistic recent history.

use assert_cmd::Command;
use chrono::{DateTime, Duration, Utc};
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use xptrack_core::db::store::ProfileUpdate;
use xptrack_core::db::{Denylist, Store};
use xptrack_core::model::SubjectId;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn db_path(dir: &Path) -> PathBuf {
    dir.join("xptrack.sqlite3")
}

fn xpt(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("xpt"));
    cmd.current_dir(dir);
    cmd.env("XPT_LOG", "error");
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join("config"));
    for key in [
        "XPT_DB",
        "XPT_FORMAT",
        "XPT_PREDICTOR_DEFAULT_DAYS",
        "XPT_MAX_TARGET_DISTANCE",
        "XPT_RANK_DEFAULT_THRESHOLD",
        "XPT_SAFE_THRESHOLD",
    ] {
        cmd.env_remove(key);
    }
    cmd.arg("--db").arg(db_path(dir));
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("xpt should not crash");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
}

fn error_code(cmd: &mut Command) -> String {
    let output = cmd.output().expect("xpt should not crash");
    assert!(!output.status.success(), "command unexpectedly succeeded");
    let err: Value = serde_json::from_slice(&output.stderr).expect("valid JSON on stderr");
    err["error"]["error_code"].as_str().unwrap_or_default().to_string()
}

fn add_subject(store: &Store, id: i64, name: &str, points: &[(DateTime<Utc>, i64)]) {
    store
        .write(|pass| {
            pass.upsert_subject(
                SubjectId::new(id),
                &ProfileUpdate {
                    name: Some(name),
                    color: Some("#3366cc"),
                    ..ProfileUpdate::default()
                },
            )?;
            for (at, value) in points {
                pass.insert_record(SubjectId::new(id), *at, *value)?;
            }
            Ok(())
        })
        .unwrap();
}

/// Seeded subjects:
/// - 1 "climber": daily records for 10 days, +100/day, ending at 1900
/// - 2 "veteran": daily records for 10 days, +20/day, ending at 50 180
/// - 3 "dormant": hourly flat records 40-38 days ago at 5000
/// - 4 "idle": two recent records with no growth at 3000
fn seeded() -> TempDir {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&db_path(dir.path()), Denylist::default()).unwrap();
    let now = Utc::now() - Duration::minutes(1);

    let daily = |base: i64, per_day: i64| -> Vec<(DateTime<Utc>, i64)> {
        (0..10)
            .map(|d| (now - Duration::days(d), base + per_day * (9 - d)))
            .collect()
    };
    add_subject(&store, 1, "climber", &daily(1_000, 100));
    add_subject(&store, 2, "veteran", &daily(50_000, 20));

    let dormant: Vec<_> = (0..48)
        .map(|h| (now - Duration::days(40) + Duration::hours(h), 5_000))
        .collect();
    add_subject(&store, 3, "dormant", &dormant);

    add_subject(
        &store,
        4,
        "idle",
        &[(now - Duration::days(3), 3_000), (now - Duration::days(1), 3_000)],
    );
    dir
}

fn ids(rows: &Value) -> Vec<i64> {
    rows.as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// top / profiles
// ---------------------------------------------------------------------------

#[test]
fn top_orders_by_xp_and_by_growth() {
    let dir = seeded();

    let by_xp = json_stdout(xpt(dir.path()).args(["top", "--json"]));
    assert_eq!(ids(&by_xp), vec![2, 3, 4, 1]);
    assert_eq!(by_xp[0]["xp"], 50_180);
    assert_eq!(by_xp[0]["position"], 1);

    let by_growth = json_stdout(xpt(dir.path()).args(["top", "--growth", "--days", "30", "--json"]));
    let ranked = ids(&by_growth);
    assert_eq!(ranked[..2], [1, 2]);
    assert!(!ranked.contains(&3), "no records inside the window");
    assert_eq!(by_growth[0]["growth"], 900);

    let limited = json_stdout(xpt(dir.path()).args(["top", "--limit", "1", "--json"]));
    assert_eq!(ids(&limited), vec![2]);
}

#[test]
fn profiles_list_shows_latest_values_and_levels() {
    let dir = seeded();
    let rows = json_stdout(xpt(dir.path()).args(["profiles", "--list", "--json"]));
    let climber = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["id"] == 1)
        .unwrap();
    assert_eq!(climber["name"], "climber");
    assert_eq!(climber["xp"], 1_900);
    assert_eq!(climber["color"], "#3366cc");
    assert!(climber["level"].as_i64().unwrap() > 0);

    xpt(dir.path())
        .args(["profiles", "--list", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ID\tNAME\tXP\tLEVEL\tCOLOR\n"));
}

// ---------------------------------------------------------------------------
// rank
// ---------------------------------------------------------------------------

#[test]
fn rank_lists_only_active_subjects() {
    let dir = seeded();

    let rows = json_stdout(xpt(dir.path()).args(["rank", "--json"]));
    assert_eq!(ids(&rows), vec![2, 1]);
    assert_eq!(rows[1]["rank"], 2);
    assert_eq!(rows[1]["growth"], 600);

    // Growth of exactly 120 over the week does not clear a bar of 120.
    let strict = json_stdout(xpt(dir.path()).args(["rank", "--threshold", "120", "--json"]));
    assert_eq!(ids(&strict), vec![1]);

    let beyond = json_stdout(xpt(dir.path()).args(["rank", "--page", "2", "--json"]));
    assert!(beyond.as_array().unwrap().is_empty());
}

#[test]
fn rank_reports_a_subject_position_and_gap() {
    let dir = seeded();

    let position = json_stdout(xpt(dir.path()).args(["rank", "<@1>", "--json"]));
    assert_eq!(position["rank"], 1);
    assert_eq!(position["active"], 2);
    assert_eq!(position["ahead"]["subject"]["id"], 2);
    assert_eq!(position["gap"], 50_180 - 1_900);

    assert_eq!(error_code(xpt(dir.path()).args(["rank", "4", "--json"])), "E4005");
    assert_eq!(
        error_code(xpt(dir.path()).args(["rank", "--days", "0", "--json"])),
        "E2002"
    );
}

#[test]
fn oversized_windows_are_argument_errors() {
    let dir = seeded();
    let huge = "999999999999";

    for args in [
        vec!["rank", "--days", huge, "--json"],
        vec!["predict", "1", "100k", "--days", huge, "--json"],
        vec!["top", "--days", huge, "--json"],
        vec!["top", "--growth", "--days", huge, "--json"],
    ] {
        let output = xpt(dir.path()).args(&args).output().expect("xpt should not crash");
        assert_eq!(output.status.code(), Some(1), "{args:?} exited abnormally");
        let err: Value = serde_json::from_slice(&output.stderr).expect("valid JSON on stderr");
        assert_eq!(err["error"]["error_code"], "E2002", "{args:?}");
    }
}

// ---------------------------------------------------------------------------
// predict
// ---------------------------------------------------------------------------

#[test]
fn predict_projects_fixed_targets() {
    let dir = seeded();

    let report = json_stdout(xpt(dir.path()).args(["predict", "1", "+1000xp", "--json"]));
    let days = report["projection"]["days"].as_f64().unwrap();
    assert!((days - 10.0).abs() < 1e-6, "days = {days}");
    assert_eq!(report["projection"]["target_xp"], 2_900);
    assert_eq!(report["projection"]["rate_per_day"], 100.0);
    assert!(!report["eta"].is_null());

    let overridden =
        json_stdout(xpt(dir.path()).args(["predict", "1", "2900xp", "--growth", "50", "--json"]));
    let days = overridden["projection"]["days"].as_f64().unwrap();
    assert!((days - 20.0).abs() < 1e-6, "days = {days}");
}

#[test]
fn predict_failures_carry_their_codes() {
    let dir = seeded();

    assert_eq!(error_code(xpt(dir.path()).args(["predict", "4", "5000xp", "--json"])), "E4002");
    assert_eq!(error_code(xpt(dir.path()).args(["predict", "3", "9000xp", "--json"])), "E4001");
    assert_eq!(error_code(xpt(dir.path()).args(["predict", "1", "soon", "--json"])), "E4003");
    assert_eq!(error_code(xpt(dir.path()).args(["predict", "1", "<@1>", "--json"])), "E4003");
    assert_eq!(
        error_code(xpt(dir.path()).args(["predict", "1", "1000000000xp", "--json"])),
        "E4004"
    );
    assert_eq!(
        error_code(xpt(dir.path()).args(["predict", "nobody", "5", "--json"])),
        "E2002"
    );
}

#[test]
fn predict_catching_a_slower_subject() {
    let dir = seeded();
    // Gap 48 280 closed at 100 - 20 = 80 xp/day.
    let report = json_stdout(xpt(dir.path()).args(["predict", "1", "<@2>", "--json"]));
    let days = report["projection"]["days"].as_f64().unwrap();
    assert!((days - 603.5).abs() < 1e-6, "days = {days}");
}

// ---------------------------------------------------------------------------
// reduce
// ---------------------------------------------------------------------------

#[test]
fn reduce_is_a_dry_run_without_yes() {
    let dir = seeded();

    let plan = json_stdout(xpt(dir.path()).args(["reduce", "--json"]));
    assert_eq!(plan["state"], "aborted");
    assert!(plan["planned"].as_u64().unwrap() > 0);
    assert_eq!(plan["deleted"], 0);
    assert_eq!(plan["records_after"], plan["records_before"]);

    let applied = json_stdout(xpt(dir.path()).args(["reduce", "--yes", "--json"]));
    assert_eq!(applied["state"], "confirmed");
    assert_eq!(applied["deleted"], plan["planned"]);
    let before = applied["records_before"].as_u64().unwrap();
    let after = applied["records_after"].as_u64().unwrap();
    assert_eq!(before - after, applied["deleted"].as_u64().unwrap());

    // Endpoints of the dormant stretch survive.
    let store = Store::open(&db_path(dir.path()), Denylist::default()).unwrap();
    let history = store.history(SubjectId::new(3)).unwrap();
    assert_eq!(history.len(), 6, "one record per 11h stretch plus the last");
    let span = history.last().unwrap().timestamp - history.first().unwrap().timestamp;
    assert_eq!(span, Duration::hours(47));

    let again = json_stdout(xpt(dir.path()).args(["reduce", "--json"]));
    assert_eq!(again["planned"], 0);
}
