//! Canonical SQLite schema for xptrack.
//!
//! - `profiles` keeps the latest display metadata for each subject
//! - `records` is the append-only time series, keyed by `(id, timestamp)`
//! - `events` holds growth-modifier intervals
//!
//! Timestamps are stored as integer microseconds since the Unix epoch (UTC).
//! The record -> profile foreign key is deferred so a write pass is checked
//! once, at `COMMIT`.

/// Migration v1: core tables.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY,
    name TEXT,
    colour TEXT,
    avatar TEXT,
    colours TEXT
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER NOT NULL REFERENCES profiles(id) DEFERRABLE INITIALLY DEFERRED,
    timestamp INTEGER NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (id, timestamp)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    multiplier REAL,
    CHECK (end_time IS NULL OR end_time >= start_time)
);
";

/// Migration v2: read-path indexes and the single-open-event guard.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_records_timestamp
    ON records(timestamp);

CREATE INDEX IF NOT EXISTS idx_records_value
    ON records(id, value DESC);

CREATE UNIQUE INDEX IF NOT EXISTS idx_events_single_open
    ON events((end_time IS NULL))
    WHERE end_time IS NULL;
";

/// Indexes expected by the range and ranking query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_records_timestamp",
    "idx_records_value",
    "idx_events_single_open",
];
