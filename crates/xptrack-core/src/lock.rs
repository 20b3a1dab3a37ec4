//! Advisory single-writer lock for collection and compaction passes.
//!
//! The lock lives next to the database (`<db>.lock`) so two `xpt` processes
//! pointed at the same store never interleave write passes. Readers do not
//! lock; WAL gives them a consistent snapshot.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::ErrorCode;

/// Default time to wait for another writer to finish.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("writer lock at {} still held after {waited:?}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("writer lock I/O: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StorageFailure,
        }
    }
}

/// Lock file path used for the database at `db_path`.
#[must_use]
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    db_path.with_file_name(name)
}

/// RAII guard: the exclusive lock is released on drop.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    /// Take the writer lock for `db_path`, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another process keeps the lock, or
    /// [`LockError::Io`] if the lock file cannot be created.
    pub fn acquire(db_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = lock_path_for(db_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let start = Instant::now();
        while file.try_lock_exclusive().is_err() {
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path,
                    waited: start.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }

        debug!(path = %path.display(), "writer lock acquired");
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
