//! Canonical role prompts and the prompt gate proof.
//!
//! The prompt text itself is owned by the collaborating documentation
//! layer; what matters to the core is the gate: a session must have fetched
//! its role's canonical prompt before any mutating tool succeeds, and the
//! fetch leaves an on-disk proof under the namespace sessions directory.

use std::path::Path;

use crate::errors::{ErrorCode, GatewayError};
use crate::plans::store::atomic_write;
use crate::session::{OperatorRole, PromptName};

pub const PLANNER_CANONICAL: &str = "\
You are the PLANNER for a governed workspace.\n\
\n\
You author and lint plans; you never mutate workspace files. A plan you\n\
submit must be fully mechanical: every phase states its objective in plain\n\
language, every allowed and forbidden operation is explicit, and every\n\
verification gate is a command whose exit code decides the outcome. Writes\n\
you believe necessary are expressed as allowlist entries for the executor,\n\
never performed directly.\n\
\n\
Tools available to you: begin_session, read_prompt, lint_plan, list_plans,\n\
read_file, read_audit_log, replay_execution, verify_workspace_integrity,\n\
bootstrap_create_foundation_plan.\n";

pub const EXECUTOR_CANONICAL: &str = "\
You are the EXECUTOR for a governed workspace.\n\
\n\
Every mutation you perform is authorised by exactly one approved plan,\n\
identified by its content hash, and passes the write gate: path\n\
containment, plan verification, static policy checks, and post-write\n\
verification with automatic revert. A refusal is final for that call;\n\
adjust the write to satisfy the plan instead of retrying verbatim. Declare\n\
your intent honestly on every write, at least twenty characters of it.\n\
\n\
Tools available to you: begin_session, read_prompt, list_plans, read_file,\n\
write_file, read_audit_log, replay_execution, verify_workspace_integrity.\n";

pub fn prompt_text(name: PromptName) -> &'static str {
    match name {
        PromptName::PlannerCanonical => PLANNER_CANONICAL,
        PromptName::ExecutorCanonical => EXECUTOR_CANONICAL,
    }
}

/// The prompt a role is entitled to fetch.
pub fn prompt_for_role(role: OperatorRole) -> Result<PromptName, GatewayError> {
    match role {
        OperatorRole::Planner => Ok(PromptName::PlannerCanonical),
        OperatorRole::Executor => Ok(PromptName::ExecutorCanonical),
        OperatorRole::Owner => Err(GatewayError::refusal(
            ErrorCode::RoleMismatch,
            "the OWNER role has no canonical prompt",
        )),
    }
}

/// Persist the prompt-gate proof for a session.
pub fn write_session_proof(
    sessions_dir: &Path,
    session_id: &str,
    prompt: PromptName,
) -> Result<(), GatewayError> {
    std::fs::create_dir_all(sessions_dir).map_err(|e| {
        GatewayError::refusal(
            ErrorCode::FileWriteFailed,
            format!("cannot prepare sessions dir: {}", e),
        )
    })?;
    let path = sessions_dir.join(format!("{}.lock", session_id));
    let body = serde_json::json!({
        "session_id": session_id,
        "prompt": prompt.as_str(),
        "fetched_at": chrono::Utc::now().to_rfc3339(),
    });
    atomic_write(&path, body.to_string().as_bytes())
}
