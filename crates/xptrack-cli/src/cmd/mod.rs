pub mod collect;
pub mod completions;
pub mod event;
pub mod init;
pub mod predict;
pub mod profiles;
pub mod rank;
pub mod reduce;
pub mod status;
pub mod top;
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tracing::debug;
use xptrack_core::api::HttpLeaderboard;
use xptrack_core::config::{TrackerConfig, resolve_config, resolve_db_path};
use xptrack_core::db::Store;
use xptrack_core::error::ErrorCode;
use xptrack_core::lock::{DEFAULT_LOCK_TIMEOUT, WriterLock};
use xptrack_core::model::days_before;

use crate::output::{CodedError, OutputMode};

/// Resolved configuration shared by every command.
#[derive(Debug)]
pub struct Context {
    pub config: TrackerConfig,
    pub db_path: PathBuf,
    pub output: OutputMode,
}

impl Context {
    /// Load config (file + `XPT_*` env) and resolve the database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file or an override does not parse.
    pub fn load(config_path: Option<&Path>, db: Option<&Path>, output: OutputMode) -> Result<Self> {
        let config = resolve_config(config_path)
            .map_err(|err| CodedError::new(ErrorCode::ConfigParseError, format!("{err:#}")))?;
        let db_path = resolve_db_path(&config, db);
        debug!(db = %db_path.display(), "context resolved");
        Ok(Self {
            config,
            db_path,
            output,
        })
    }

    /// Open an existing store.
    ///
    /// # Errors
    ///
    /// Fails with `NotInitialized` when the database file does not exist.
    pub fn open_store(&self) -> Result<Store> {
        if !self.db_path.exists() {
            return Err(CodedError::new(
                ErrorCode::NotInitialized,
                format!("no database at {}", self.db_path.display()),
            )
            .into());
        }
        Store::open(&self.db_path, self.config.denylist.to_denylist())
            .with_context(|| format!("Failed to open {}", self.db_path.display()))
    }

    /// Take the single-writer lock beside the database.
    ///
    /// # Errors
    ///
    /// Returns the lock error when another writer holds it past the timeout.
    pub fn lock_writer(&self) -> Result<WriterLock> {
        Ok(WriterLock::acquire(&self.db_path, DEFAULT_LOCK_TIMEOUT)?)
    }

    /// HTTP leaderboard client for the configured API.
    ///
    /// # Errors
    ///
    /// Fails with `ApiUrlMissing` when no URL is configured.
    pub fn leaderboard(&self) -> Result<HttpLeaderboard> {
        let url = self
            .config
            .collector
            .api_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                CodedError::new(ErrorCode::ApiUrlMissing, "no leaderboard API URL configured")
            })?;
        Ok(HttpLeaderboard::new(url))
    }
}

/// Start of a `--days` look-back window ending at `now`.
///
/// # Errors
///
/// Fails with `InvalidArgument` when the window is not positive or reaches
/// outside the supported date range.
pub fn window_start(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    (days > 0)
        .then(|| days_before(now, days))
        .flatten()
        .ok_or_else(|| {
            CodedError::new(
                ErrorCode::InvalidArgument,
                format!("invalid window of {days} days"),
            )
            .into()
        })
}
