//! Persisted token cache keyed by device host.
//!
//! # File Format
//!
//! ```json
//! { "tokens": { "192.168.1.20": "12345678" } }
//! ```
//!
//! Writes take the [`CacheLock`], re-read the file, apply the change and
//! replace the file atomically, so concurrent processes never lose each
//! other's entries.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::lock::CacheLock;

// ============================================================================
// Constants
// ============================================================================

/// Directory under the user cache directory.
pub const CACHE_DIR_NAME: &str = "tizen-remote";

/// Cache file name.
pub const CACHE_FILE_NAME: &str = "tokens.json";

/// Default wait for the cache lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// TokenStore
// ============================================================================

/// Storage for device tokens.
#[async_trait]
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Returns the token stored for `host`, or `None` on a miss.
    async fn read(&self, host: &str) -> Result<Option<String>>;

    /// Stores `token` for `host`, replacing any previous value.
    async fn write(&self, host: &str, token: &str) -> Result<()>;

    /// Removes the token for `host`. Removing a missing entry succeeds.
    async fn clear(&self, host: &str) -> Result<()>;
}

// ============================================================================
// FileTokenStore
// ============================================================================

/// On-disk cache file contents.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

/// JSON token cache shared by every process of the user.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl FileTokenStore {
    /// Creates a store backed by the file at `path`.
    ///
    /// The lock file is `path` with `.lock` appended.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = OsString::from(path.as_os_str());
        lock_path.push(".lock");

        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Creates a store at the default location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the platform has no cache directory.
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(default_path()?))
    }

    /// Sets how long writers wait for the lock.
    #[inline]
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Returns the cache file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the lock file path.
    #[inline]
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Runs `update` on the cache file under the lock.
    async fn modify<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        let lock_timeout = self.lock_timeout;

        tokio::task::spawn_blocking(move || {
            let _lock = CacheLock::acquire(&lock_path, lock_timeout)?;
            let mut cache = load(&path);
            update(&mut cache.tokens);
            save(&path, &cache)
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn read(&self, host: &str) -> Result<Option<String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read token cache");
                return Ok(None);
            }
        };

        match serde_json::from_str::<CacheFile>(&contents) {
            Ok(mut cache) => Ok(cache.tokens.remove(host)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt token cache");
                Ok(None)
            }
        }
    }

    async fn write(&self, host: &str, token: &str) -> Result<()> {
        let host = host.to_string();
        let token = token.to_string();
        debug!(%host, path = %self.path.display(), "Persisting token");
        self.modify(move |tokens| {
            tokens.insert(host, token);
        })
        .await
    }

    async fn clear(&self, host: &str) -> Result<()> {
        let host = host.to_string();
        debug!(%host, path = %self.path.display(), "Clearing persisted token");
        self.modify(move |tokens| {
            tokens.remove(&host);
        })
        .await
    }
}

/// Returns `<user cache dir>/tizen-remote/tokens.json`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the platform has no cache directory.
pub fn default_path() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME))
        .ok_or_else(|| Error::config("no user cache directory for the token cache"))
}

/// Loads the cache, treating a missing or corrupt file as empty.
fn load(path: &Path) -> CacheFile {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Replacing corrupt token cache");
            CacheFile::default()
        }),
        Err(_) => CacheFile::default(),
    }
}

/// Replaces the cache file atomically.
fn save(path: &Path, cache: &CacheFile) -> Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, cache)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

// ============================================================================
// MemoryTokenStore
// ============================================================================

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<FxHashMap<String, String>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn read(&self, host: &str) -> Result<Option<String>> {
        Ok(self.tokens.lock().get(host).cloned())
    }

    async fn write(&self, host: &str, token: &str) -> Result<()> {
        self.tokens.lock().insert(host.to_string(), token.to_string());
        Ok(())
    }

    async fn clear(&self, host: &str) -> Result<()> {
        self.tokens.lock().remove(host);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
