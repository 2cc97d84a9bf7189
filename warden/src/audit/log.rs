//! Hash-chained append-only audit log.
//!
//! Writer discipline: every append happens under the workspace lock; the
//! writer reads the existing tail for the predecessor hash, builds the
//! entry, serialises it to a single line, appends with fsync, and only then
//! releases the lock. `seq` assignment is therefore totally ordered by lock
//! acquisition even across processes.
//!
//! Reader discipline: streaming, one line at a time, verifying sequence
//! monotonicity, `prev_hash` linkage, and the recomputed `entry_hash`. Any
//! failure is non-recoverable and reported as a fatal `INV_AUDIT_CHAIN`
//! violation; the dispatch layer engages the kill-switch.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::lock::WorkspaceLock;
use super::{AuditDraft, AuditEntry, AuditResult, GENESIS, STALE_LOCK_RECLAIMED_NOTE};
use crate::errors::{ErrorCode, GatewayError};
use crate::invariant::{invariant_violation, InvariantId};

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    lock: WorkspaceLock,
    lock_timeout: Duration,
}

/// Last verified position of the chain.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuditHead {
    pub seq: u64,
    pub entry_hash: String,
}

/// Handle passed to [`AuditLog::with_lock`] closures: appends within the
/// caller's critical section.
pub struct AppendSession<'a> {
    log: &'a AuditLog,
}

impl AppendSession<'_> {
    pub fn append(&mut self, draft: AuditDraft) -> Result<AuditEntry, GatewayError> {
        self.log.append_locked(draft)
    }
}

impl AuditLog {
    pub fn new(path: PathBuf, lock: WorkspaceLock, lock_timeout: Duration) -> Self {
        AuditLog {
            path,
            lock,
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside the workspace-wide critical section. File mutation,
    /// revert, and log append all happen under this one lock.
    pub fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut AppendSession<'_>) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let guard = self.lock.acquire(self.lock_timeout)?;
        let mut session = AppendSession { log: self };
        if guard.reclaimed_stale {
            session.append(AuditDraft::system(
                "audit_lock",
                AuditResult::Ok,
                STALE_LOCK_RECLAIMED_NOTE,
            ))?;
        }
        let result = f(&mut session);
        drop(guard);
        result
    }

    /// Append one entry under the lock.
    pub fn append(&self, draft: AuditDraft) -> Result<AuditEntry, GatewayError> {
        self.with_lock(|session| session.append(draft))
    }

    /// Stream the whole log, verifying the chain. Returns every entry or the
    /// fatal violation that breaks it.
    pub fn read_verified(&self) -> Result<Vec<AuditEntry>, GatewayError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("cannot open audit log {}: {}", self.path.display(), e),
                ));
            }
        };

        let mut entries = Vec::new();
        let mut prev_hash = GENESIS.to_string();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let number = index + 1;
            let line = line.map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("cannot read audit log line {}: {}", number, e),
                )
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
                invariant_violation(
                    InvariantId::AuditChain,
                    format!("audit log line {} is not valid JSON: {}", number, e),
                )
            })?;
            let expected_seq = entries.len() as u64 + 1;
            if entry.seq != expected_seq {
                return Err(invariant_violation(
                    InvariantId::AuditChain,
                    format!(
                        "audit log line {}: seq {} where {} was expected",
                        number, entry.seq, expected_seq
                    ),
                ));
            }
            if entry.prev_hash != prev_hash {
                return Err(invariant_violation(
                    InvariantId::AuditChain,
                    format!("audit log line {}: prev_hash does not match predecessor", number),
                ));
            }
            if !entry.hash_is_consistent() {
                return Err(invariant_violation(
                    InvariantId::AuditChain,
                    format!("audit log line {}: entry_hash does not match content", number),
                ));
            }
            prev_hash = entry.entry_hash.clone();
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Verify the chain end to end; `None` for an empty log.
    pub fn verify(&self) -> Result<Option<AuditHead>, GatewayError> {
        Ok(self.read_verified()?.last().map(|entry| AuditHead {
            seq: entry.seq,
            entry_hash: entry.entry_hash.clone(),
        }))
    }

    // ------------------------------------------------------------------
    // Internals (lock already held)
    // ------------------------------------------------------------------

    fn append_locked(&self, draft: AuditDraft) -> Result<AuditEntry, GatewayError> {
        let (seq, prev_hash) = self.tail_locked()?;
        let entry = draft.into_entry(seq + 1, prev_hash);
        let line = serde_json::to_string(&entry).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot serialise audit entry: {}", e),
            )
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileWriteFailed,
                    format!("cannot prepare audit log dir: {}", e),
                )
            })?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileWriteFailed,
                    format!("cannot open audit log {}: {}", self.path.display(), e),
                )
            })?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileWriteFailed,
                    format!("cannot append to audit log: {}", e),
                )
            })?;
        file.sync_all().map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot fsync audit log: {}", e),
            )
        })?;
        tracing::debug!(seq = entry.seq, tool = %entry.tool, "audit entry appended");
        Ok(entry)
    }

    /// Sequence number and hash of the last entry, reading only the tail.
    fn tail_locked(&self) -> Result<(u64, String), GatewayError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((0, GENESIS.to_string()));
            }
            Err(e) => {
                return Err(GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("cannot open audit log {}: {}", self.path.display(), e),
                ));
            }
        };
        let mut last: Option<(usize, String)> = None;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("cannot read audit log: {}", e),
                )
            })?;
            if !line.trim().is_empty() {
                last = Some((index + 1, line));
            }
        }
        match last {
            None => Ok((0, GENESIS.to_string())),
            Some((number, line)) => {
                let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
                    invariant_violation(
                        InvariantId::AuditChain,
                        format!("audit log tail (line {}) is not valid JSON: {}", number, e),
                    )
                })?;
                Ok((entry.seq, entry.entry_hash))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_log(root: &Path) -> AuditLog {
        AuditLog::new(
            root.join("audit-log.jsonl"),
            WorkspaceLock::new(root.join("audit.lock"), Duration::from_secs(10)),
            Duration::from_secs(5),
        )
    }

    fn draft(tool: &str) -> AuditDraft {
        AuditDraft::system(tool, AuditResult::Ok, "test")
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        let entry = log.append(draft("begin_session")).unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(entry.prev_hash, GENESIS);
    }

    #[test]
    fn appends_chain_and_verify_passes() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        let a = log.append(draft("one")).unwrap();
        let b = log.append(draft("two")).unwrap();
        assert_eq!(b.seq, 2);
        assert_eq!(b.prev_hash, a.entry_hash);

        let head = log.verify().unwrap().unwrap();
        assert_eq!(head.seq, 2);
        assert_eq!(head.entry_hash, b.entry_hash);
    }

    #[test]
    fn edited_line_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        log.append(draft("one")).unwrap();
        log.append(draft("two")).unwrap();
        log.append(draft("three")).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        let edited: Vec<String> = raw
            .lines()
            .map(|l| {
                if l.contains("\"two\"") {
                    l.replace("\"notes\":\"test\"", "\"notes\":\"doctored\"")
                } else {
                    l.to_string()
                }
            })
            .collect();
        fs::write(log.path(), edited.join("\n") + "\n").unwrap();

        let err = log.read_verified().unwrap_err();
        assert_eq!(err.invariant_id(), Some(InvariantId::AuditChain));
    }

    #[test]
    fn deleted_line_is_a_sequence_gap() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        log.append(draft("one")).unwrap();
        log.append(draft("two")).unwrap();
        log.append(draft("three")).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        let kept: Vec<&str> = raw.lines().filter(|l| !l.contains("\"two\"")).collect();
        fs::write(log.path(), kept.join("\n") + "\n").unwrap();

        let err = log.read_verified().unwrap_err();
        assert_eq!(err.invariant_id(), Some(InvariantId::AuditChain));
    }

    #[test]
    fn stale_lock_reclaim_is_logged() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        log.append(draft("one")).unwrap();

        let lock_dir = dir.path().join("audit.lock");
        fs::create_dir(&lock_dir).unwrap();
        filetime::set_file_mtime(&lock_dir, filetime::FileTime::from_unix_time(0, 0)).unwrap();

        log.append(draft("two")).unwrap();
        let entries = log.read_verified().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].notes, STALE_LOCK_RECLAIMED_NOTE);
        assert_eq!(entries[1].tool, "audit_lock");
    }

    #[test]
    fn empty_log_verifies_to_none() {
        let dir = tempdir().unwrap();
        let log = test_log(dir.path());
        assert_eq!(log.verify().unwrap(), None);
    }
}
