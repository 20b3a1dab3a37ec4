//! SQLite storage for subjects, records and events.
//!
//! Runtime defaults are intentionally conservative:
//! - `journal_mode = WAL` so read-only queries see a consistent snapshot
//!   while a collection or compaction pass is writing
//! - `busy_timeout = 5s` to reduce transient lock failures under contention
//! - `foreign_keys = ON` so records always reference a known profile

pub mod denylist;
pub mod events;
pub mod migrations;
pub mod schema;
pub mod store;

pub use denylist::Denylist;
pub use store::{Store, StoreError, WritePass};

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default database file name inside the data directory.
pub const DEFAULT_DB_FILE: &str = "xptrack.sqlite3";

/// Open (or create) the SQLite database, apply runtime pragmas, and migrate
/// schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("open database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply schema migrations")?;

    Ok(conn)
}

/// Open a migrated in-memory database (tests and dry runs).
///
/// # Errors
///
/// Returns an error if configuring or migrating the database fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("enable foreign keys")?;
    migrations::migrate(&mut conn).context("apply schema migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}
