//! The shared mutual-exclusion primitive.
//!
//! One lock directory serialises every workspace mutation: audit appends,
//! gated file writes, and governance / kill-switch read-modify-writes all
//! take this same lock. Directory creation is atomic on every platform the
//! gateway targets, which makes it safe across unrelated processes.
//!
//! A crashed holder leaves the directory behind; a waiter that finds it
//! older than the staleness threshold removes it, reacquires, and reports
//! the reclaim so the log records a warning entry.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::errors::{ErrorCode, GatewayError};

/// RAII guard; dropping it releases the lock directory.
#[derive(Debug)]
pub struct LockGuard {
    dir: PathBuf,
    /// True when this acquisition forcibly removed a stale holder.
    pub reclaimed_stale: bool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir(&self.dir);
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceLock {
    dir: PathBuf,
    stale_after: Duration,
}

impl WorkspaceLock {
    pub fn new(dir: PathBuf, stale_after: Duration) -> Self {
        WorkspaceLock { dir, stale_after }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Acquire the lock, waiting up to `timeout`. Stale holders are removed
    /// after `stale_after`; persistent contention surfaces as
    /// `LOCK_CONTENTION`.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard, GatewayError> {
        if let Some(parent) = self.dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileWriteFailed,
                    format!("cannot prepare lock parent {}: {}", parent.display(), e),
                )
            })?;
        }

        let started = Instant::now();
        let mut reclaimed_stale = false;
        loop {
            match std::fs::create_dir(&self.dir) {
                Ok(()) => {
                    return Ok(LockGuard {
                        dir: self.dir.clone(),
                        reclaimed_stale,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.holder_is_stale() {
                        tracing::warn!(lock = %self.dir.display(), "removing stale lock directory");
                        let _ = std::fs::remove_dir_all(&self.dir);
                        reclaimed_stale = true;
                        continue;
                    }
                }
                Err(e) => {
                    return Err(GatewayError::refusal(
                        ErrorCode::FileWriteFailed,
                        format!("cannot create lock dir {}: {}", self.dir.display(), e),
                    ));
                }
            }
            if started.elapsed() > timeout {
                return Err(GatewayError::refusal(
                    ErrorCode::LockContention,
                    format!(
                        "gave up acquiring {} after {:?}",
                        self.dir.display(),
                        timeout
                    ),
                ));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn holder_is_stale(&self) -> bool {
        let Ok(meta) = std::fs::metadata(&self.dir) else {
            // Holder released between our failed create and this check.
            return false;
        };
        let Ok(mtime) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(mtime)
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }
}
