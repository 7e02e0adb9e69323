//! Single-flight file lock
//!
//! Import runs may be triggered by independent processes (two scheduled
//! triggers firing close together, an operator running the CLI by hand).
//! At most one run per lock name may proceed, so mutual exclusion is
//! enforced with an advisory `flock` on a file in a shared directory rather
//! than with any in-process primitive.
//!
//! # Protocol
//!
//! - The lock file lives at `<lock_dir>/yatco_<name>.lock`.
//! - Acquisition is a non-blocking `LOCK_EX` attempt. The winner truncates the
//!   file and writes a [`LockState`] (owner, timestamp, name) into it.
//! - Losers close their descriptor, sleep with exponential backoff
//!   (`min(2^floor(elapsed/5), 5)` units), reopen and try again. A descriptor
//!   is never held open across a sleep.
//! - A lock whose recorded timestamp is older than [`STALE_LOCK_AFTER`] is
//!   presumed abandoned: the file is deleted and one immediate attempt is made
//!   on a fresh file. This is the only way a lock is ever broken.
//! - Release unlocks and closes the descriptor and leaves the file on disk
//!   for diagnostics.
//! - [`FileLock::check_lock`] probes with a non-blocking `LOCK_SH`, which
//!   never disturbs the holder.
//!
//! Individual filesystem failures are logged and suppressed; the outcome of
//! [`FileLock::acquire`] is always reported through its return value. Hosts
//! without advisory locks get [`LockError::Unsupported`] rather than an
//! unserialized run.

use crate::error::LockError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default time to wait for a held lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// A held lock older than this is presumed abandoned
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(600);

/// Upper bound on the lock state read from disk
const MAX_LOCK_STATE_BYTES: u64 = 1024;

/// Backoff never exceeds this many units
const MAX_BACKOFF_UNITS: u32 = 5;

/// Elapsed units per backoff doubling
const BACKOFF_DOUBLING_UNITS: u64 = 5;

/// Content of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub owner_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub acquired_at: DateTime<Utc>,
    pub lock_name: String,
}

impl LockState {
    fn new(owner_id: &str, lock_name: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            acquired_at: Utc::now(),
            lock_name: lock_name.to_string(),
        }
    }

    /// How long ago the lock was (re)acquired
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.acquired_at
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        chrono::Duration::from_std(stale_after).is_ok_and(|limit| self.age() > limit)
    }
}

/// An acquired lock. Dropping it closes the descriptor, which also releases
/// the lock; [`FileLock::release`] does so explicitly and reports failures.
#[derive(Debug)]
pub struct LockHandle {
    file: File,
    path: PathBuf,
    lock_name: String,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }
}

/// Factory for named file locks in one directory
#[derive(Debug, Clone)]
pub struct FileLock {
    dir: PathBuf,
    owner_id: String,
    stale_after: Duration,
    backoff_unit: Duration,
}

impl FileLock {
    /// Locks stored in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            owner_id: default_owner_id(),
            stale_after: STALE_LOCK_AFTER,
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Locks stored in the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Scale of the backoff schedule (one second by default)
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Path of the file backing `lock_name`
    pub fn lock_path(&self, lock_name: &str) -> PathBuf {
        let safe: String = lock_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("yatco_{safe}.lock"))
    }

    /// Acquire `lock_name`, retrying with backoff until `timeout` elapses
    pub async fn acquire(&self, lock_name: &str, timeout: Duration) -> Result<LockHandle, LockError> {
        let path = self.lock_path(lock_name);
        let started = Instant::now();
        let mut file = open_lock_file(&path);

        loop {
            if let Some(candidate) = file.take() {
                if try_exclusive(&candidate, &path, lock_name)? {
                    return Ok(self.claim(candidate, path, lock_name));
                }
                // Close before sleeping.
                drop(candidate);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break;
            }

            let delay = backoff_delay(elapsed, self.backoff_unit);
            debug!(
                lock_name,
                elapsed_ms = elapsed.as_millis() as u64,
                delay_ms = delay.as_millis() as u64,
                "Lock busy, backing off"
            );
            tokio::time::sleep(delay).await;

            file = open_lock_file(&path);
            let stale = file
                .as_mut()
                .and_then(read_lock_state)
                .filter(|state| state.is_stale(self.stale_after));

            if let Some(state) = stale {
                // Only unlink the file the stale state was read from; another
                // breaker may already have replaced it.
                let unchanged = file.as_ref().is_some_and(|f| same_file(f, &path));
                if !unchanged {
                    debug!(lock_name, "Lock file replaced since it was read, not breaking");
                    continue;
                }

                warn!(
                    lock_name,
                    owner_id = %state.owner_id,
                    acquired_at = %state.acquired_at,
                    "Breaking stale lock"
                );
                drop(file.take());
                remove_lock_file(&path);

                file = open_lock_file(&path);
                if let Some(candidate) = file.take() {
                    if try_exclusive(&candidate, &path, lock_name)? {
                        return Ok(self.claim(candidate, path, lock_name));
                    }
                    file = Some(candidate);
                }
            }
        }

        let waited = started.elapsed();
        warn!(lock_name, waited_ms = waited.as_millis() as u64, "Timed out waiting for lock");
        Err(LockError::Timeout {
            lock_name: lock_name.to_string(),
            waited,
        })
    }

    /// Unlock and close `handle`. The lock file stays on disk.
    ///
    /// Returns `false` if the unlock call failed; the descriptor is closed
    /// either way, which drops the lock.
    pub fn release(&self, handle: LockHandle) -> bool {
        let LockHandle {
            file,
            path,
            lock_name,
        } = handle;

        match unlock(&file) {
            Ok(()) => {
                info!(lock_name = %lock_name, path = %path.display(), "Released lock");
                true
            },
            Err(e) => {
                warn!(lock_name = %lock_name, error = %e, "Failed to unlock");
                false
            },
        }
    }

    /// State of `lock_name` if it is currently held by someone.
    ///
    /// An existing file that nobody holds reports `None`. When the lock
    /// cannot be probed the recorded state is returned as-is.
    pub fn check_lock(&self, lock_name: &str) -> Option<LockState> {
        let path = self.lock_path(lock_name);
        let mut file = File::open(&path).ok()?;

        match flock_nonblocking(&file, FlockMode::Shared) {
            Ok(true) => {
                if let Err(e) = unlock(&file) {
                    debug!(lock_name, error = %e, "Failed to drop shared probe lock");
                }
                return None;
            },
            Ok(false) => {},
            Err(e) => {
                warn!(lock_name, error = %e, "Cannot probe lock, reporting recorded state");
            },
        }

        let state = read_lock_state(&mut file);
        if state.is_none() {
            debug!(lock_name, "Lock is held but its state is unreadable");
        }
        state
    }

    /// Delete the lock file so the next acquire succeeds regardless of age.
    ///
    /// Returns whether a file was removed.
    pub fn clear_lock(&self, lock_name: &str) -> bool {
        let path = self.lock_path(lock_name);
        let removed = remove_lock_file(&path);
        if removed {
            warn!(lock_name, path = %path.display(), "Lock file cleared manually");
        }
        removed
    }

    /// Record ownership in a freshly locked file
    fn claim(&self, mut file: File, path: PathBuf, lock_name: &str) -> LockHandle {
        let state = LockState::new(&self.owner_id, lock_name);
        if let Err(e) = write_lock_state(&mut file, &state) {
            warn!(lock_name, error = %e, "Lock acquired but its state could not be written");
        }

        info!(lock_name, owner_id = %self.owner_id, path = %path.display(), "Acquired lock");
        LockHandle {
            file,
            path,
            lock_name: lock_name.to_string(),
        }
    }
}

/// Backoff after `elapsed` of waiting: `min(2^floor(elapsed/5), 5)` units
pub fn backoff_delay(elapsed: Duration, unit: Duration) -> Duration {
    if unit.is_zero() {
        return Duration::ZERO;
    }
    let elapsed_units = (elapsed.as_secs_f64() / unit.as_secs_f64()).floor() as u64;
    let exponent = elapsed_units / BACKOFF_DOUBLING_UNITS;
    let factor = if exponent >= 3 {
        MAX_BACKOFF_UNITS
    } else {
        (1u32 << exponent).min(MAX_BACKOFF_UNITS)
    };
    unit * factor
}

fn default_owner_id() -> String {
    match hostname::get() {
        Ok(host) => format!("{}:{}", host.to_string_lossy(), std::process::id()),
        Err(_) => uuid::Uuid::new_v4().to_string(),
    }
}

fn open_lock_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            debug!(path = %parent.display(), error = %e, "Failed to create lock directory");
        }
    }

    match OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
    {
        Ok(file) => Some(file),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to open lock file");
            None
        },
    }
}

fn remove_lock_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to remove lock file");
            false
        },
    }
}

fn read_lock_state(file: &mut File) -> Option<LockState> {
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut content = String::new();
    file.take(MAX_LOCK_STATE_BYTES)
        .read_to_string(&mut content)
        .ok()?;
    serde_json::from_str(content.trim()).ok()
}

fn write_lock_state(file: &mut File, state: &LockState) -> io::Result<()> {
    let json = serde_json::to_vec(state).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.flush()?;
    file.sync_data()
}

#[derive(Debug, Clone, Copy)]
enum FlockMode {
    Exclusive,
    Shared,
}

/// Non-blocking exclusive lock on `file`, which must still be the file at
/// `path`. `Ok(true)` means the lock was obtained.
fn try_exclusive(file: &File, path: &Path, lock_name: &str) -> Result<bool, LockError> {
    let obtained = classify_flock(flock_nonblocking(file, FlockMode::Exclusive), path, lock_name)?;
    if obtained && !same_file(file, path) {
        // Locked an inode that was unlinked in the meantime.
        debug!(lock_name, path = %path.display(), "Lock file replaced while locking");
        return Ok(false);
    }
    Ok(obtained)
}

/// Platforms without advisory locks fail the acquire; other flock errors
/// count as contention.
fn classify_flock(result: io::Result<bool>, path: &Path, lock_name: &str) -> Result<bool, LockError> {
    match result {
        Ok(obtained) => Ok(obtained),
        Err(e) if e.kind() == io::ErrorKind::Unsupported => {
            warn!(lock_name, "Advisory file locks are not supported on this platform");
            Err(LockError::Unsupported {
                lock_name: lock_name.to_string(),
            })
        },
        Err(e) => {
            debug!(path = %path.display(), error = %e, "flock failed");
            Ok(false)
        },
    }
}

/// Whether `file` and `path` refer to the same inode
#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(open), Ok(on_disk)) => open.dev() == on_disk.dev() && open.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[cfg(unix)]
fn flock_nonblocking(file: &File, mode: FlockMode) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        FlockMode::Exclusive => libc::LOCK_EX,
        FlockMode::Shared => libc::LOCK_SH,
    } | libc::LOCK_NB;

    // SAFETY: the descriptor belongs to `file`, which outlives this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

// Advisory locking is only wired up for unix hosts; elsewhere acquiring
// fails instead of running unserialized.
#[cfg(not(unix))]
fn flock_nonblocking(_file: &File, _mode: FlockMode) -> io::Result<bool> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}


#[cfg(all(test, not(unix)))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod unsupported_tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_fails_without_advisory_locks() {
        let dir = TempDir::new().unwrap();
        let lock = FileLock::new(dir.path()).with_backoff_unit(Duration::from_millis(10));

        let err = lock.acquire("import", Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, LockError::Unsupported { .. }));
    }
}
