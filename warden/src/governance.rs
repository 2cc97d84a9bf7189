//! Persisted governance state.
//!
//! A small JSON document under the namespace directory tracking whether
//! bootstrap is still available and how many approved plans exist. Bootstrap
//! is enabled exactly while the count is zero; writing the first plan flips
//! it forever. Mutation is read-modify-write performed inside the caller's
//! audit-lock critical section, keeping one log entry per state change.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, GatewayError};
use crate::plans::store::atomic_write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceState {
    pub bootstrap_enabled: bool,
    pub approved_plans_count: u64,
}

impl Default for GovernanceState {
    fn default() -> Self {
        GovernanceState {
            bootstrap_enabled: true,
            approved_plans_count: 0,
        }
    }
}

impl GovernanceState {
    /// The flag must agree with the count.
    pub fn is_consistent(&self) -> bool {
        self.bootstrap_enabled == (self.approved_plans_count == 0)
    }
}

#[derive(Debug, Clone)]
pub struct GovernanceStore {
    path: PathBuf,
}

impl GovernanceStore {
    pub fn new(path: PathBuf) -> Self {
        GovernanceStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state; a missing file is the fresh-workspace
    /// default.
    pub fn load(&self) -> Result<GovernanceState, GatewayError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::InvalidInputFormat,
                    format!("malformed governance state {}: {}", self.path.display(), e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GovernanceState::default()),
            Err(e) => Err(GatewayError::refusal(
                ErrorCode::FileReadFailed,
                format!("cannot read governance state {}: {}", self.path.display(), e),
            )),
        }
    }

    /// Persist atomically. Callers hold the audit lock.
    pub fn save(&self, state: &GovernanceState) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileWriteFailed,
                    format!("cannot prepare governance dir: {}", e),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot serialise governance state: {}", e),
            )
        })?;
        atomic_write(&self.path, json.as_bytes())
    }
}
