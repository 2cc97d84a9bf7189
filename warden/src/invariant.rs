//! Invariant runtime.
//!
//! Assertion primitive for the conditions that must always hold. A violated
//! invariant raises a fatal [`GatewayError::Invariant`] carrying a stable
//! identifier; dispatch engages the kill-switch before the error surfaces.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, GatewayError};

/// Stable identifiers for the system invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvariantId {
    #[serde(rename = "INV_ROOT_LOCKED_ONCE")]
    RootLockedOnce,
    #[serde(rename = "INV_PATH_CONTAINED")]
    PathContained,
    #[serde(rename = "INV_PLAN_IMMUTABLE")]
    PlanImmutable,
    #[serde(rename = "INV_AUDIT_CHAIN")]
    AuditChain,
    #[serde(rename = "INV_AUDIT_SINGLE_WRITER")]
    AuditSingleWriter,
    #[serde(rename = "INV_BOOTSTRAP_ONCE")]
    BootstrapOnce,
    #[serde(rename = "INV_KILL_SWITCH_STICKY")]
    KillSwitchSticky,
}

impl InvariantId {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvariantId::RootLockedOnce => "INV_ROOT_LOCKED_ONCE",
            InvariantId::PathContained => "INV_PATH_CONTAINED",
            InvariantId::PlanImmutable => "INV_PLAN_IMMUTABLE",
            InvariantId::AuditChain => "INV_AUDIT_CHAIN",
            InvariantId::AuditSingleWriter => "INV_AUDIT_SINGLE_WRITER",
            InvariantId::BootstrapOnce => "INV_BOOTSTRAP_ONCE",
            InvariantId::KillSwitchSticky => "INV_KILL_SWITCH_STICKY",
        }
    }

    /// The error code surfaced when this invariant is violated.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            InvariantId::RootLockedOnce => ErrorCode::InvRootLockedOnce,
            InvariantId::PathContained => ErrorCode::InvPathContained,
            InvariantId::PlanImmutable => ErrorCode::InvPlanImmutable,
            InvariantId::AuditChain => ErrorCode::InvAuditChain,
            InvariantId::AuditSingleWriter => ErrorCode::InvAuditSingleWriter,
            InvariantId::BootstrapOnce => ErrorCode::InvBootstrapOnce,
            InvariantId::KillSwitchSticky => ErrorCode::InvKillSwitchSticky,
        }
    }
}

impl std::fmt::Display for InvariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure-class identifiers used in kill-switch trigger records.
pub const FAILURE_AUDIT: &str = "F-AUDIT";
pub const FAILURE_STARTUP: &str = "F-STARTUP";

/// Construct the fatal error for a violated invariant.
pub fn invariant_violation(id: InvariantId, detail: impl Into<String>) -> GatewayError {
    let detail = detail.into();
    tracing::error!(invariant = %id, %detail, "invariant violated");
    GatewayError::Invariant { id, detail }
}

/// Assert `cond`; on failure raise the fatal invariant error.
pub fn ensure_invariant(
    cond: bool,
    id: InvariantId,
    detail: impl FnOnce() -> String,
) -> Result<(), GatewayError> {
    if cond {
        Ok(())
    } else {
        Err(invariant_violation(id, detail()))
    }
}
