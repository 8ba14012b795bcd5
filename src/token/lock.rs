//! Cross-process advisory lock for the token cache.
//!
//! The lock is an exclusive OS file lock on a sibling `.lock` file. It is held
//! by a [`CacheLock`] guard and released when the guard drops, on every
//! exit path.
//!
//! Acquisition blocks the calling thread; call it from the blocking pool.

// ============================================================================
// Imports
// ============================================================================

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Interval between lock attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// CacheLock
// ============================================================================

/// Exclusive lock on the token cache, released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Acquires the lock at `path`, waiting up to `timeout`.
    ///
    /// Creates the lock file and its parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheLock`] if the lock file cannot be opened or
    /// another holder keeps the lock past `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::cache_lock(path, format!("cannot create directory: {e}")))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::cache_lock(path, format!("cannot open lock file: {e}")))?;

        let deadline = Instant::now() + timeout;
        loop {
            if try_lock(&file)? {
                trace!(path = %path.display(), "Token cache locked");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if Instant::now() >= deadline {
                return Err(Error::cache_lock(
                    path,
                    format!("still held by another process after {}ms", timeout.as_millis()),
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Returns the lock file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release token cache lock");
        } else {
            trace!(path = %self.path.display(), "Token cache unlocked");
        }
    }
}

// ============================================================================
// Locking
// ============================================================================

/// Attempts a non-blocking exclusive lock. `Ok(false)` means contended.
fn try_lock(file: &File) -> Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(TryLockError::WouldBlock) => Ok(false),
        Err(TryLockError::Error(e)) => Err(Error::Io(e)),
    }
}

// ============================================================================
// Tests
// ============================================================================
