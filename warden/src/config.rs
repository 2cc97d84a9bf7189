//! Gateway configuration.
//!
//! Carries the contract tables the enforcement core treats as data rather
//! than constants: the intent minimum length, the per-role metadata field
//! contracts, fatigue limits, soft deadlines, and lock staleness. Loadable
//! from a TOML file; every field has a default so a missing or partial file
//! still yields a working configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, GatewayError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Minimum accepted length for the `intent` argument of mutating tools.
    #[serde(default = "default_intent_min_len")]
    pub intent_min_len: usize,
    /// Consecutive approvals an operator may grant before a mandatory pause.
    #[serde(default = "default_consecutive_approval_limit")]
    pub consecutive_approval_limit: u32,
    /// Total approvals an operator may grant in one session.
    #[serde(default = "default_session_approval_limit")]
    pub session_approval_limit: u32,
    /// Soft deadline for one policy-engine evaluation, in seconds.
    #[serde(default = "default_policy_deadline_secs")]
    pub policy_deadline_secs: u64,
    /// Soft deadline for post-write verification, in seconds.
    #[serde(default = "default_post_write_deadline_secs")]
    pub post_write_deadline_secs: u64,
    /// Age after which a held audit lock directory is considered stale.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
    /// Timeout for acquiring the audit lock before surfacing contention.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Minimum delay between recovery initiation and confirmation.
    #[serde(default = "default_recovery_delay_secs")]
    pub recovery_delay_secs: u64,
    /// Metadata fields each declared content role must carry on code-bearing
    /// paths. Keys are role names as declared in write requests.
    #[serde(default = "default_role_contracts")]
    pub role_contracts: BTreeMap<String, Vec<String>>,
}

fn default_intent_min_len() -> usize {
    20
}
fn default_consecutive_approval_limit() -> u32 {
    10
}
fn default_session_approval_limit() -> u32 {
    50
}
fn default_policy_deadline_secs() -> u64 {
    30
}
fn default_post_write_deadline_secs() -> u64 {
    60
}
fn default_stale_lock_secs() -> u64 {
    10
}
fn default_lock_timeout_secs() -> u64 {
    5
}
fn default_recovery_delay_secs() -> u64 {
    30
}

fn default_role_contracts() -> BTreeMap<String, Vec<String>> {
    let mut contracts = BTreeMap::new();
    contracts.insert(
        "EXECUTABLE".to_string(),
        vec![
            "purpose".to_string(),
            "connected_via".to_string(),
            "failure_modes".to_string(),
        ],
    );
    contracts
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            intent_min_len: default_intent_min_len(),
            consecutive_approval_limit: default_consecutive_approval_limit(),
            session_approval_limit: default_session_approval_limit(),
            policy_deadline_secs: default_policy_deadline_secs(),
            post_write_deadline_secs: default_post_write_deadline_secs(),
            stale_lock_secs: default_stale_lock_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            recovery_delay_secs: default_recovery_delay_secs(),
            role_contracts: default_role_contracts(),
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        let Some(path) = path else {
            return Ok(GatewayConfig::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileReadFailed,
                format!("failed to read config {}: {}", path.display(), e),
            )
        })?;
        toml::from_str(&raw).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::InvalidInputFormat,
                format!("malformed config {}: {}", path.display(), e),
            )
        })
    }

    /// The fields a declared content role must carry, if that role is known.
    pub fn contract_fields(&self, role: &str) -> Option<&[String]> {
        self.role_contracts.get(role).map(Vec::as_slice)
    }
}
