//! Warden error model.
//!
//! Every failure path in the gateway produces a structured [`ErrorEnvelope`]
//! built from a [`GatewayError`]. Error codes form a closed sum type so that
//! refusal handling is exhaustive at compile time; the taxonomy groups codes
//! by concern (input, policy, authority, path, integrity, resource) and each
//! code knows how it must be treated: audited as a refusal, audited as an
//! error, or escalated to the kill-switch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invariant::InvariantId;

/// How an audited failure is recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Recorded with `result = "refusal"`: the gateway declined the action.
    Refusal,
    /// Recorded with `result = "error"`: the action failed for operational reasons.
    Error,
}

/// Concern-level classification of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Policy,
    Authority,
    Path,
    Integrity,
    Resource,
    Operational,
}

/// Canonical error codes surfaced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors: local to the call.
    InvalidInputType,
    InvalidInputValue,
    InvalidInputFormat,

    // Policy refusals.
    PolicyViolation,
    CommentOutDetected,
    RoleContractViolation,
    PlanMissingSection,
    PlanMissingField,
    PlanInvalidPhaseId,
    PlanInvalidPath,
    PlanPathEscape,
    PlanNotEnforceable,
    PlanNotAuditable,
    PlanHashMismatch,

    // Authority refusals.
    PlanNotApproved,
    PlanNotFound,
    PromptGateLocked,
    OperatorIdentityMissing,
    SessionNotInitialized,
    RoleMismatch,
    BootstrapDisabled,
    InsufficientPermissions,
    InvalidSignature,
    RecoveryNotInitiated,
    RecoveryDelayPending,

    // Path refusals.
    PathTraversal,
    PathOutOfWorkspace,

    // Integrity failures: engage the kill-switch.
    InvRootLockedOnce,
    InvPathContained,
    InvPlanImmutable,
    InvAuditChain,
    InvAuditSingleWriter,
    InvBootstrapOnce,
    InvKillSwitchSticky,
    PostWriteVerificationFailed,

    // Resource failures: retried once, then surfaced locally.
    FileReadFailed,
    FileWriteFailed,
    LockContention,

    // Operational refusals.
    KillSwitchEngaged,
    OperatorFatigue,
    AttestationEvidenceInvalid,
    AttestationDisabled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInputType => "INVALID_INPUT_TYPE",
            ErrorCode::InvalidInputValue => "INVALID_INPUT_VALUE",
            ErrorCode::InvalidInputFormat => "INVALID_INPUT_FORMAT",
            ErrorCode::PolicyViolation => "POLICY_VIOLATION",
            ErrorCode::CommentOutDetected => "COMMENT_OUT_DETECTED",
            ErrorCode::RoleContractViolation => "ROLE_CONTRACT_VIOLATION",
            ErrorCode::PlanMissingSection => "PLAN_MISSING_SECTION",
            ErrorCode::PlanMissingField => "PLAN_MISSING_FIELD",
            ErrorCode::PlanInvalidPhaseId => "PLAN_INVALID_PHASE_ID",
            ErrorCode::PlanInvalidPath => "PLAN_INVALID_PATH",
            ErrorCode::PlanPathEscape => "PLAN_PATH_ESCAPE",
            ErrorCode::PlanNotEnforceable => "PLAN_NOT_ENFORCEABLE",
            ErrorCode::PlanNotAuditable => "PLAN_NOT_AUDITABLE",
            ErrorCode::PlanHashMismatch => "PLAN_HASH_MISMATCH",
            ErrorCode::PlanNotApproved => "PLAN_NOT_APPROVED",
            ErrorCode::PlanNotFound => "PLAN_NOT_FOUND",
            ErrorCode::PromptGateLocked => "PROMPT_GATE_LOCKED",
            ErrorCode::OperatorIdentityMissing => "OPERATOR_IDENTITY_MISSING",
            ErrorCode::SessionNotInitialized => "SESSION_NOT_INITIALIZED",
            ErrorCode::RoleMismatch => "ROLE_MISMATCH",
            ErrorCode::BootstrapDisabled => "BOOTSTRAP_DISABLED",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::RecoveryNotInitiated => "RECOVERY_NOT_INITIATED",
            ErrorCode::RecoveryDelayPending => "RECOVERY_DELAY_PENDING",
            ErrorCode::PathTraversal => "PATH_TRAVERSAL",
            ErrorCode::PathOutOfWorkspace => "PATH_OUT_OF_WORKSPACE",
            ErrorCode::InvRootLockedOnce => "INV_ROOT_LOCKED_ONCE",
            ErrorCode::InvPathContained => "INV_PATH_CONTAINED",
            ErrorCode::InvPlanImmutable => "INV_PLAN_IMMUTABLE",
            ErrorCode::InvAuditChain => "INV_AUDIT_CHAIN",
            ErrorCode::InvAuditSingleWriter => "INV_AUDIT_SINGLE_WRITER",
            ErrorCode::InvBootstrapOnce => "INV_BOOTSTRAP_ONCE",
            ErrorCode::InvKillSwitchSticky => "INV_KILL_SWITCH_STICKY",
            ErrorCode::PostWriteVerificationFailed => "POST_WRITE_VERIFICATION_FAILED",
            ErrorCode::FileReadFailed => "FILE_READ_FAILED",
            ErrorCode::FileWriteFailed => "FILE_WRITE_FAILED",
            ErrorCode::LockContention => "LOCK_CONTENTION",
            ErrorCode::KillSwitchEngaged => "KILL_SWITCH_ENGAGED",
            ErrorCode::OperatorFatigue => "OPERATOR_FATIGUE",
            ErrorCode::AttestationEvidenceInvalid => "ATTESTATION_EVIDENCE_INVALID",
            ErrorCode::AttestationDisabled => "ATTESTATION_DISABLED",
        }
    }

    pub fn class(&self) -> ErrorClass {
        use ErrorCode::*;
        match self {
            InvalidInputType | InvalidInputValue | InvalidInputFormat => ErrorClass::Input,
            PolicyViolation | CommentOutDetected | RoleContractViolation | PlanMissingSection
            | PlanMissingField | PlanInvalidPhaseId | PlanInvalidPath | PlanPathEscape
            | PlanNotEnforceable | PlanNotAuditable | PlanHashMismatch => ErrorClass::Policy,
            PlanNotApproved | PlanNotFound | PromptGateLocked | OperatorIdentityMissing
            | SessionNotInitialized | RoleMismatch | BootstrapDisabled
            | InsufficientPermissions | InvalidSignature | RecoveryNotInitiated
            | RecoveryDelayPending => ErrorClass::Authority,
            PathTraversal | PathOutOfWorkspace => ErrorClass::Path,
            InvRootLockedOnce | InvPathContained | InvPlanImmutable | InvAuditChain
            | InvAuditSingleWriter | InvBootstrapOnce | InvKillSwitchSticky
            | PostWriteVerificationFailed => ErrorClass::Integrity,
            FileReadFailed | FileWriteFailed | LockContention => ErrorClass::Resource,
            KillSwitchEngaged | OperatorFatigue | AttestationEvidenceInvalid
            | AttestationDisabled => ErrorClass::Operational,
        }
    }

    /// Integrity failures are fatal: they engage the kill-switch and require
    /// owner recovery.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Integrity
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self.class() {
            ErrorClass::Resource => FailureKind::Error,
            _ => FailureKind::Refusal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type threaded through every fallible gateway operation.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// A structured refusal or operational failure.
    #[error("{code}: {message}")]
    Refusal {
        code: ErrorCode,
        message: String,
        plan_hash: Option<String>,
        phase_id: Option<String>,
    },
    /// A fatal invariant violation. Unrecoverable; the dispatch layer engages
    /// the kill-switch before surfacing it.
    #[error("invariant {id} violated: {detail}")]
    Invariant { id: InvariantId, detail: String },
}

impl GatewayError {
    pub fn refusal(code: ErrorCode, message: impl Into<String>) -> Self {
        GatewayError::Refusal {
            code,
            message: message.into(),
            plan_hash: None,
            phase_id: None,
        }
    }

    pub fn with_plan(mut self, hash: &str) -> Self {
        if let GatewayError::Refusal { plan_hash, .. } = &mut self {
            *plan_hash = Some(hash.to_string());
        }
        self
    }

    pub fn with_phase(mut self, phase: &str) -> Self {
        if let GatewayError::Refusal { phase_id, .. } = &mut self {
            *phase_id = Some(phase.to_string());
        }
        self
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Refusal { code, .. } => *code,
            GatewayError::Invariant { id, .. } => id.error_code(),
        }
    }

    pub fn invariant_id(&self) -> Option<InvariantId> {
        match self {
            GatewayError::Invariant { id, .. } => Some(*id),
            GatewayError::Refusal { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GatewayError::Refusal { message, .. } => message.clone(),
            GatewayError::Invariant { detail, .. } => detail.clone(),
        }
    }

    pub fn plan_hash(&self) -> Option<&str> {
        match self {
            GatewayError::Refusal { plan_hash, .. } => plan_hash.as_deref(),
            GatewayError::Invariant { .. } => None,
        }
    }

    pub fn phase_id(&self) -> Option<&str> {
        match self {
            GatewayError::Refusal { phase_id, .. } => phase_id.as_deref(),
            GatewayError::Invariant { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Invariant { .. }) || self.code().is_fatal()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::refusal(ErrorCode::FileReadFailed, e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::refusal(ErrorCode::InvalidInputFormat, e.to_string())
    }
}

/// The wire-visible failure envelope. Required fields are always present,
/// possibly null before a session is bound; the whole structure is JSON-safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_code: ErrorCode,
    pub human_message: String,
    pub role: Option<String>,
    pub session_id: Option<String>,
    pub workspace_root: Option<String>,
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invariant_id: Option<InvariantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    pub fn from_error(
        err: &GatewayError,
        tool: Option<&str>,
        role: Option<&str>,
        session_id: Option<&str>,
        workspace_root: Option<&str>,
    ) -> Self {
        ErrorEnvelope {
            error_code: err.code(),
            human_message: err.message(),
            role: role.map(str::to_string),
            session_id: session_id.map(str::to_string),
            workspace_root: workspace_root.map(str::to_string),
            tool: tool.map(str::to_string),
            invariant_id: err.invariant_id(),
            phase_id: err.phase_id().map(str::to_string),
            plan_hash: err.plan_hash().map(str::to_string),
            cause: None,
            timestamp: Utc::now(),
        }
    }
}
