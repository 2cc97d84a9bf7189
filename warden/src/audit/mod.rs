//! Tamper-evident audit records.
//!
//! Every tool outcome is one JSON object on one line of the workspace audit
//! log. Entries are hash-chained: `entry_hash` covers the canonical JSON of
//! the record without the hash field itself, and `prev_hash` repeats the
//! predecessor's `entry_hash` (the literal `GENESIS` for the first entry).

pub mod lock;
pub mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::hash_canonical;
use crate::errors::ErrorCode;

/// `prev_hash` of the first entry in a chain.
pub const GENESIS: &str = "GENESIS";

/// Warning note recorded when a writer reclaims a stale lock directory.
pub const STALE_LOCK_RECLAIMED_NOTE: &str = "stale_audit_lock_reclaimed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Ok,
    Error,
    Refusal,
}

/// A fully chained, persisted audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub session_id: String,
    pub operator_id: String,
    pub role: String,
    pub tool: String,
    pub plan_hash: Option<String>,
    pub phase_id: Option<String>,
    /// SHA-256 of the canonicalised tool arguments.
    pub args_hash: String,
    pub result: AuditResult,
    pub error_code: Option<ErrorCode>,
    pub invariant_id: Option<String>,
    pub notes: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Recompute the hash this entry must carry: canonical JSON of the record
    /// with `entry_hash` removed.
    pub fn compute_entry_hash(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("entry_hash");
        }
        hash_canonical(&value)
    }

    pub fn hash_is_consistent(&self) -> bool {
        self.entry_hash == self.compute_entry_hash()
    }
}

/// The caller-supplied part of an entry; chaining fields are filled in by the
/// log under its lock.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub session_id: String,
    pub operator_id: String,
    pub role: String,
    pub tool: String,
    pub plan_hash: Option<String>,
    pub phase_id: Option<String>,
    pub args_hash: String,
    pub result: AuditResult,
    pub error_code: Option<ErrorCode>,
    pub invariant_id: Option<String>,
    pub notes: String,
}

impl AuditDraft {
    /// Minimal draft for system-originated records.
    pub fn system(tool: &str, result: AuditResult, notes: impl Into<String>) -> Self {
        AuditDraft {
            session_id: String::new(),
            operator_id: String::new(),
            role: String::new(),
            tool: tool.to_string(),
            plan_hash: None,
            phase_id: None,
            args_hash: String::new(),
            result,
            error_code: None,
            invariant_id: None,
            notes: notes.into(),
        }
    }

    pub(crate) fn into_entry(self, seq: u64, prev_hash: String) -> AuditEntry {
        let mut entry = AuditEntry {
            seq,
            ts: Utc::now(),
            session_id: self.session_id,
            operator_id: self.operator_id,
            role: self.role,
            tool: self.tool,
            plan_hash: self.plan_hash,
            phase_id: self.phase_id,
            args_hash: self.args_hash,
            result: self.result,
            error_code: self.error_code,
            invariant_id: self.invariant_id,
            notes: self.notes,
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_entry_hash();
        entry
    }
}
