//! Typed reads and the write pass over the tracking database.
//!
//! Every mutation goes through a [`WritePass`]: one `BEGIN IMMEDIATE`
//! transaction per collection or compaction pass. A pass that is dropped
//! without a successful [`WritePass::commit`] is rolled back, so readers never
//! observe half of a pass.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, warn};

use super::Denylist;
use crate::error::ErrorCode;
use crate::model::{Point, Record, RecordKey, Subject, SubjectId, SubjectSeries, from_micros, to_micros};

/// Errors raised by store reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A required input was missing or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `(subject_id, timestamp)` already exists.
    #[error("duplicate record for subject {subject_id} at {timestamp}")]
    DuplicateRecord {
        subject_id: SubjectId,
        timestamp: DateTime<Utc>,
    },

    /// Creating an event while another one is still open.
    #[error("event {0} is still open")]
    EventExists(i64),

    /// Ending an event when none is open.
    #[error("no event is open")]
    NoOpenEvent,

    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::DuplicateRecord { .. } => ErrorCode::DuplicateRecord,
            Self::EventExists(_) => ErrorCode::EventExists,
            Self::NoOpenEvent => ErrorCode::NoOpenEvent,
            Self::Sqlite(_) => ErrorCode::StorageFailure,
        }
    }

    /// Busy/locked database errors clear up on their own; everything else is
    /// permanent for the current input.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Non-empty profile fields to merge into a subject.
///
/// `None` and empty strings both mean "unknown": they never clear a stored
/// value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileUpdate<'a> {
    pub name: Option<&'a str>,
    pub color: Option<&'a str>,
    pub avatar: Option<&'a str>,
    pub recent_colors: Option<&'a [String]>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The tracking store: one SQLite connection plus the configured denylist.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    denylist: Denylist,
}

impl Store {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path, denylist: Denylist) -> Result<Self> {
        let conn = super::open_connection(path)
            .with_context(|| format!("open store {}", path.display()))?;
        Ok(Self { conn, denylist })
    }

    /// Open a migrated in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory(denylist: Denylist) -> Result<Self> {
        Ok(Self {
            conn: super::open_in_memory()?,
            denylist,
        })
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub const fn denylist(&self) -> &Denylist {
        &self.denylist
    }

    /// Start a write pass (`BEGIN IMMEDIATE`).
    ///
    /// # Errors
    ///
    /// Returns an error if the write lock cannot be taken or a pass is
    /// already open on this connection.
    pub fn begin_pass(&self) -> Result<WritePass<'_>, StoreError> {
        WritePass::begin(&self.conn)
    }

    /// Run `f` inside a single pass and commit it once.
    ///
    /// # Errors
    ///
    /// Returns the first error from `f` (after rolling back) or from commit.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&WritePass<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut pass = self.begin_pass()?;
        let value = f(&pass)?;
        pass.commit()?;
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Subjects
    // -----------------------------------------------------------------------

    /// Fetch one subject's profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn subject(&self, id: SubjectId) -> Result<Option<Subject>, StoreError> {
        let subject = self
            .conn
            .query_row(
                "SELECT id, name, colour, avatar, colours FROM profiles WHERE id = ?1",
                params![id],
                row_to_subject,
            )
            .optional()?;
        Ok(subject)
    }

    /// All subjects, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn subjects(&self) -> Result<Vec<Subject>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, colour, avatar, colours FROM profiles ORDER BY id")?;
        let rows = stmt.query_map([], row_to_subject)?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// A subject's records in `[start, end]`, ascending by timestamp.
    ///
    /// Denylisted windows come back empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn records_for(
        &self,
        id: SubjectId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, StoreError> {
        if self.denylist.hides(id, start, end) {
            debug!(subject = %id, "series suppressed by denylist");
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT id, timestamp, value FROM records \
             WHERE id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(
            params![id, lower_bound(start), upper_bound(end)],
            row_to_record,
        )?;
        collect_rows(rows)
    }

    /// A subject's full history, ascending, ignoring the denylist.
    ///
    /// Maintenance passes use this; analytic reads go through
    /// [`Store::records_for`].
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn history(&self, id: SubjectId) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, timestamp, value FROM records WHERE id = ?1 ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![id], row_to_record)?;
        collect_rows(rows)
    }

    /// Total number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn record_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// The most recent record timestamp across all subjects.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<i64> =
            self.conn
                .query_row("SELECT MAX(timestamp) FROM records", [], |row| row.get(0))?;
        latest
            .map(|us| from_micros(us).map_err(|e| to_conversion_error(0, e)))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Distinct collection instants in `[start, end]`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn timestamps_in_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT timestamp FROM records \
             WHERE timestamp >= ?1 AND timestamp <= ?2 \
             ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![lower_bound(start), upper_bound(end)], |row| {
            let us: i64 = row.get(0)?;
            from_micros(us).map_err(|e| to_conversion_error(0, e))
        })?;
        collect_rows(rows)
    }

    /// Every subject with its maximum recorded value, highest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_values(&self) -> Result<Vec<(Subject, i64)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.colour, p.avatar, p.colours, MAX(r.value) AS top \
             FROM profiles p INNER JOIN records r ON r.id = p.id \
             GROUP BY p.id ORDER BY top DESC, p.id ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row_to_subject(row)?, row.get(5)?)))?;
        collect_rows(rows)
    }

    /// Subjects ranked by maximum recorded value, each with its series in
    /// `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn top_by_current_value(
        &self,
        limit: Option<usize>,
        include: Option<&HashSet<SubjectId>>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SubjectSeries>, StoreError> {
        let mut sql = String::from(
            "SELECT p.id, p.name, p.colour, p.avatar, p.colours \
             FROM profiles p INNER JOIN records r ON r.id = p.id",
        );
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(ids) = include {
            push_id_filter(&mut sql, &mut param_values, "WHERE p.id IN", ids);
        }
        sql.push_str(" GROUP BY p.id ORDER BY MAX(r.value) DESC, p.id ASC");
        push_limit(&mut sql, limit);

        let profiles = self.query_subjects(&sql, &param_values)?;

        let mut result = Vec::with_capacity(profiles.len());
        for subject in profiles {
            let points: Vec<Point> = self
                .records_for(subject.id, start, end)?
                .into_iter()
                .map(|r| Point {
                    timestamp: r.timestamp,
                    value: r.value,
                })
                .collect();
            if points.is_empty() {
                continue;
            }
            result.push(SubjectSeries { subject, points });
        }
        Ok(result)
    }

    /// Subjects ranked by `max(value) - min(value)` inside `[start, end]`,
    /// each with its series offset from the first in-window value.
    ///
    /// Growth-excluded subjects never appear.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn top_by_growth(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
        include: Option<&HashSet<SubjectId>>,
    ) -> Result<Vec<SubjectSeries>, StoreError> {
        let mut sql = String::from(
            "SELECT p.id, p.name, p.colour, p.avatar, p.colours \
             FROM profiles p INNER JOIN records r ON r.id = p.id \
             WHERE r.timestamp >= ?1 AND r.timestamp <= ?2",
        );
        let mut param_values: Vec<Box<dyn ToSql>> =
            vec![Box::new(to_micros(start)), Box::new(upper_bound(end))];
        if let Some(ids) = include {
            push_id_filter(&mut sql, &mut param_values, "AND p.id IN", ids);
        }
        let excluded = self.denylist.growth_excluded();
        if !excluded.is_empty() {
            push_id_filter(&mut sql, &mut param_values, "AND p.id NOT IN", excluded);
        }
        sql.push_str(" GROUP BY p.id ORDER BY MAX(r.value) - MIN(r.value) DESC, p.id ASC");
        push_limit(&mut sql, limit);

        let profiles = self.query_subjects(&sql, &param_values)?;

        let mut result = Vec::with_capacity(profiles.len());
        for subject in profiles {
            let records = self.records_for(subject.id, Some(start), end)?;
            let Some(base) = records.first().map(|r| r.value) else {
                continue;
            };
            let points = records
                .iter()
                .map(|r| Point {
                    timestamp: r.timestamp,
                    value: r.value - base,
                })
                .collect();
            result.push(SubjectSeries { subject, points });
        }
        Ok(result)
    }

    fn query_subjects(
        &self,
        sql: &str,
        param_values: &[Box<dyn ToSql>],
    ) -> Result<Vec<Subject>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(params_from_iter(params_ref), row_to_subject)?;
        collect_rows(rows)
    }
}

// ---------------------------------------------------------------------------
// Write pass
// ---------------------------------------------------------------------------

/// One all-or-nothing write transaction.
///
/// `COMMIT` may be retried: SQLite keeps the transaction open when a commit
/// fails (busy database, deferred constraint). Dropping an uncommitted pass
/// rolls it back.
#[derive(Debug)]
pub struct WritePass<'a> {
    conn: &'a Connection,
    open: bool,
}

impl<'a> WritePass<'a> {
    fn begin(conn: &'a Connection) -> Result<Self, StoreError> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, open: true })
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Run `f` as one unit inside the pass. When `f` fails, every write it
    /// made is undone and the rest of the pass is kept.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or from opening or releasing the
    /// savepoint.
    pub fn atomically<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.conn.execute_batch("SAVEPOINT unit")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE unit")?;
                Ok(value)
            }
            Err(err) => {
                // ROLLBACK TO keeps the savepoint open.
                if let Err(undo) = self.conn.execute_batch("ROLLBACK TO unit; RELEASE unit") {
                    warn!(error = %undo, "undoing a partial write failed");
                }
                Err(err)
            }
        }
    }

    /// Create the subject if absent, otherwise merge the non-empty fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn upsert_subject(
        &self,
        id: SubjectId,
        update: &ProfileUpdate<'_>,
    ) -> Result<(), StoreError> {
        let colours = update
            .recent_colors
            .filter(|colors| !colors.is_empty())
            .map(|colors| colors.join(","));

        self.conn
            .prepare_cached(
                "INSERT INTO profiles (id, name, colour, avatar, colours) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                 name = COALESCE(excluded.name, profiles.name), \
                 colour = COALESCE(excluded.colour, profiles.colour), \
                 avatar = COALESCE(excluded.avatar, profiles.avatar), \
                 colours = COALESCE(excluded.colours, profiles.colours)",
            )?
            .execute(params![
                id,
                non_empty(update.name),
                non_empty(update.color),
                non_empty(update.avatar),
                colours,
            ])?;
        Ok(())
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] for a negative value and
    /// [`StoreError::DuplicateRecord`] when the key already exists.
    pub fn insert_record(
        &self,
        id: SubjectId,
        timestamp: DateTime<Utc>,
        value: i64,
    ) -> Result<(), StoreError> {
        if value < 0 {
            return Err(StoreError::InvalidArgument("record value must be non-negative"));
        }

        let result = self
            .conn
            .prepare_cached("INSERT INTO records (id, timestamp, value) VALUES (?1, ?2, ?3)")?
            .execute(params![id, to_micros(timestamp), value]);

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(StoreError::DuplicateRecord {
                    subject_id: id,
                    timestamp,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete one record; returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn delete_record(&self, key: &RecordKey) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM records WHERE id = ?1 AND timestamp = ?2")?
            .execute(params![key.subject_id, to_micros(key.timestamp)])?;
        Ok(removed > 0)
    }

    pub(crate) const fn connection(&self) -> &Connection {
        self.conn
    }

    /// Commit the pass. Safe to call again after a failure.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite rejects the commit; the pass stays open.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if !self.open {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    /// Discard every mutation made in this pass.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite rejects the rollback.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for WritePass<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of abandoned write pass failed");
            } else {
                debug!("abandoned write pass rolled back");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn row_to_subject(row: &Row<'_>) -> rusqlite::Result<Subject> {
    let colours: Option<String> = row.get(4)?;
    Ok(Subject {
        id: row.get(0)?,
        display_name: row.get(1)?,
        color: row.get(2)?,
        avatar: row.get(3)?,
        recent_colors: colours
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let us: i64 = row.get(1)?;
    Ok(Record {
        subject_id: row.get(0)?,
        timestamp: from_micros(us).map_err(|e| to_conversion_error(1, e))?,
        value: row.get(2)?,
    })
}

fn to_conversion_error(column: usize, err: rusqlite::types::FromSqlError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Integer, Box::new(err))
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn lower_bound(start: Option<DateTime<Utc>>) -> i64 {
    start.map_or(i64::MIN, to_micros)
}

fn upper_bound(end: Option<DateTime<Utc>>) -> i64 {
    end.map_or(i64::MAX, to_micros)
}

fn push_id_filter(
    sql: &mut String,
    param_values: &mut Vec<Box<dyn ToSql>>,
    prefix: &str,
    ids: &HashSet<SubjectId>,
) {
    let mut sorted: Vec<SubjectId> = ids.iter().copied().collect();
    sorted.sort_unstable();

    let mut placeholders = Vec::with_capacity(sorted.len());
    for id in sorted {
        param_values.push(Box::new(id));
        placeholders.push(format!("?{}", param_values.len()));
    }
    if placeholders.is_empty() {
        // `IN ()` is not valid SQL; an empty include set matches nothing.
        let _ = write!(sql, " {prefix} (NULL)");
    } else {
        let _ = write!(sql, " {prefix} ({})", placeholders.join(", "));
    }
}

fn push_limit(sql: &mut String, limit: Option<usize>) {
    if let Some(limit) = limit {
        let _ = write!(sql, " LIMIT {limit}");
    }
}
