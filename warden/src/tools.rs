//! Tool dispatch shim.
//!
//! The thin adapter between the transport and the enforcement core: it
//! registers every tool with its input schema, parses arguments off the
//! wire, and turns core errors into envelopes. No enforcement logic lives
//! here. When the kill-switch is engaged at startup only the read-only
//! subset (plus the recovery tools) registers.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::context::GatewayContext;
use crate::errors::{ErrorCode, GatewayError};
use crate::gate::WriteRequest;
use crate::kill_switch::RecoveryAcks;
use crate::rpc::{RpcServer, ToolHandler};
use crate::session::OperatorRole;

/// Register the tool surface. `read_only` drops the mutating tools, as on a
/// halted workspace.
pub fn register_tools(server: &mut RpcServer, ctx: Arc<GatewayContext>, read_only: bool) {
    server.register_tool(
        "begin_session",
        "Lock the workspace root for this session and bind the operator identity.",
        json!({
            "type": "object",
            "properties": {
                "workspace_root": {"type": "string", "description": "Absolute path of the repository to govern"},
                "operator_id": {"type": "string"},
                "role": {"type": "string", "enum": ["PLANNER", "EXECUTOR", "OWNER"]}
            },
            "required": ["workspace_root", "operator_id", "role"]
        }),
        sync_tool(&ctx, "begin_session", |ctx, args| {
            let root = require_str(&args, "workspace_root")?;
            let operator = require_str(&args, "operator_id")?;
            let role = require_str(&args, "role")?;
            let info = ctx.begin_session(&root, &operator, &role)?;
            to_value(&info)
        }),
    );

    server.register_tool(
        "read_prompt",
        "Fetch the caller's canonical role prompt, satisfying the prompt gate.",
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "enum": ["PLANNER_CANONICAL", "EXECUTOR_CANONICAL"]}
            },
            "required": ["name"]
        }),
        sync_tool(&ctx, "read_prompt", |ctx, args| {
            let name = require_str(&args, "name")?;
            let text = ctx.read_prompt(&name)?;
            Ok(json!({"name": name, "text": text}))
        }),
    );

    server.register_tool(
        "list_plans",
        "Enumerate stored plans with their lint findings.",
        json!({"type": "object", "properties": {}}),
        sync_tool(&ctx, "list_plans", |ctx, _args| {
            let plans = ctx.list_plans()?;
            to_value(&json!({"plans": plans}))
        }),
    );

    server.register_tool(
        "read_file",
        "Read a file inside the governed workspace.",
        json!({
            "type": "object",
            "properties": {"path": {"type": "string", "description": "Root-relative path"}},
            "required": ["path"]
        }),
        sync_tool(&ctx, "read_file", |ctx, args| {
            let path = require_str(&args, "path")?;
            let content = ctx.read_file(&path)?;
            Ok(json!({"path": path, "content": content}))
        }),
    );

    server.register_tool(
        "lint_plan",
        "Lint plan content; returns all findings, never refuses on content.",
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "expected_hash": {"type": "string"}
            },
            "required": ["content"]
        }),
        sync_tool(&ctx, "lint_plan", |ctx, args| {
            require_role(ctx, OperatorRole::Planner, "lint_plan")?;
            let content = require_str(&args, "content")?;
            let expected = optional_str(&args, "expected_hash")?;
            let report = ctx.lint_plan(&content, expected.as_deref());
            to_value(&report)
        }),
    );

    server.register_tool(
        "read_audit_log",
        "Read the audit log with read-through integrity verification.",
        json!({
            "type": "object",
            "properties": {
                "seq_start": {"type": "integer"},
                "seq_end": {"type": "integer"}
            }
        }),
        sync_tool(&ctx, "read_audit_log", |ctx, args| {
            let start = optional_u64(&args, "seq_start")?;
            let end = optional_u64(&args, "seq_end")?;
            let entries = ctx.read_audit_log(start, end)?;
            to_value(&json!({"entries": entries}))
        }),
    );

    server.register_tool(
        "replay_execution",
        "Deterministically re-evaluate the audit log for one plan.",
        json!({
            "type": "object",
            "properties": {
                "plan_hash": {"type": "string"},
                "seq_start": {"type": "integer"},
                "seq_end": {"type": "integer"}
            },
            "required": ["plan_hash"]
        }),
        sync_tool(&ctx, "replay_execution", |ctx, args| {
            let plan_hash = require_str(&args, "plan_hash")?;
            let start = optional_u64(&args, "seq_start")?;
            let end = optional_u64(&args, "seq_end")?;
            let report = ctx.replay_execution(&plan_hash, start, end)?;
            to_value(&report)
        }),
    );

    server.register_tool(
        "verify_workspace_integrity",
        "Run the integrity battery: audit chain, plan store, governance, attested writes.",
        json!({"type": "object", "properties": {}}),
        sync_tool(&ctx, "verify_workspace_integrity", |ctx, _args| {
            let report = ctx.verify_workspace_integrity()?;
            to_value(&report)
        }),
    );

    server.register_tool(
        "generate_attestation_bundle",
        "Produce a signed evidence bundle for the workspace's audit state.",
        json!({"type": "object", "properties": {}}),
        sync_tool(&ctx, "generate_attestation_bundle", |ctx, _args| {
            let bundle = ctx.generate_attestation_bundle()?;
            to_value(&bundle)
        }),
    );

    server.register_tool(
        "verify_attestation_bundle",
        "Verify a bundle's signature and its evidence against current state.",
        json!({
            "type": "object",
            "properties": {"bundle": {"type": "object"}},
            "required": ["bundle"]
        }),
        sync_tool(&ctx, "verify_attestation_bundle", |ctx, args| {
            let bundle_value = args.get("bundle").cloned().ok_or_else(|| {
                GatewayError::refusal(ErrorCode::InvalidInputType, "bundle object is required")
            })?;
            let bundle = serde_json::from_value(bundle_value).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::InvalidInputFormat,
                    format!("bundle does not parse: {}", e),
                )
            })?;
            ctx.verify_attestation_bundle(&bundle)?;
            Ok(json!({"verified": true}))
        }),
    );

    server.register_tool(
        "export_attestation_bundle",
        "Generate a bundle and persist it under the workspace namespace.",
        json!({"type": "object", "properties": {}}),
        sync_tool(&ctx, "export_attestation_bundle", |ctx, _args| {
            let path = ctx.export_attestation_bundle()?;
            Ok(json!({"exported_to": path}))
        }),
    );

    server.register_tool(
        "initiate_recovery",
        "Owner-only first step of kill-switch recovery; issues a one-shot code.",
        json!({
            "type": "object",
            "properties": {
                "halt_report_path": {"type": "string"},
                "understood_reason": {"type": "boolean"},
                "understood_failure": {"type": "boolean"},
                "understood_forbidden_operations": {"type": "boolean"},
                "responsibility_acknowledged": {"type": "boolean"}
            },
            "required": [
                "halt_report_path",
                "understood_reason",
                "understood_failure",
                "understood_forbidden_operations",
                "responsibility_acknowledged"
            ]
        }),
        sync_tool(&ctx, "initiate_recovery", |ctx, args| {
            let report = require_str(&args, "halt_report_path")?;
            let acks = parse_acks(&args)?;
            let code = ctx.initiate_recovery(&report, acks)?;
            Ok(json!({
                "confirmation_code": code,
                "delay_seconds": ctx.config().recovery_delay_secs
            }))
        }),
    );

    server.register_tool(
        "confirm_recovery",
        "Owner-only second step of kill-switch recovery, after the delay.",
        json!({
            "type": "object",
            "properties": {
                "confirmation_code": {"type": "string"},
                "understood_reason": {"type": "boolean"},
                "understood_failure": {"type": "boolean"},
                "understood_forbidden_operations": {"type": "boolean"},
                "responsibility_acknowledged": {"type": "boolean"}
            },
            "required": [
                "confirmation_code",
                "understood_reason",
                "understood_failure",
                "understood_forbidden_operations",
                "responsibility_acknowledged"
            ]
        }),
        sync_tool(&ctx, "confirm_recovery", |ctx, args| {
            let code = require_str(&args, "confirmation_code")?;
            let acks = parse_acks(&args)?;
            ctx.confirm_recovery(acks, &code)?;
            Ok(json!({"recovered": true}))
        }),
    );

    if read_only {
        tracing::warn!("kill-switch engaged; mutating tools are not registered");
        return;
    }

    server.register_tool(
        "write_file",
        "Write a file through the full governance gate. Supply exactly one of content (full bytes) or patch (a unified diff over the current file).",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string", "description": "Full file bytes"},
                "patch": {"type": "string", "description": "Unified diff applied to the current file; the target must exist"},
                "prior_hash": {"type": "string"},
                "plan_hash": {"type": "string"},
                "phase_id": {"type": "string"},
                "role": {"type": "string"},
                "purpose": {"type": "string"},
                "connected_via": {"type": "string"},
                "failure_modes": {"type": "string"},
                "intent": {"type": "string", "minLength": 20},
                "risk_acknowledgment": {"type": "array", "items": {"type": "string"}}
            },
            "required": [
                "path", "plan_hash", "phase_id", "role",
                "purpose", "connected_via", "failure_modes", "intent"
            ]
        }),
        sync_tool(&ctx, "write_file", |ctx, args| {
            let request: WriteRequest = serde_json::from_value(args).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::InvalidInputType,
                    format!("write_file arguments do not parse: {}", e),
                )
            })?;
            let outcome = ctx.write_file(&request)?;
            to_value(&outcome)
        }),
    );

    server.register_tool(
        "bootstrap_create_foundation_plan",
        "One-time HMAC-gated write of the very first plan.",
        json!({
            "type": "object",
            "properties": {
                "plan_content": {"type": "string"},
                "hmac_payload": {"type": "string"},
                "hmac_signature": {"type": "string"}
            },
            "required": ["plan_content", "hmac_payload", "hmac_signature"]
        }),
        sync_tool(&ctx, "bootstrap_create_foundation_plan", |ctx, args| {
            let content = require_str(&args, "plan_content")?;
            let payload = require_str(&args, "hmac_payload")?;
            let signature = require_str(&args, "hmac_signature")?;
            let outcome = ctx.bootstrap_create_foundation_plan(&content, &payload, &signature)?;
            to_value(&outcome)
        }),
    );
}

// ---------------------------------------------------------------------------
// Handler plumbing
// ---------------------------------------------------------------------------

fn sync_tool<F>(ctx: &Arc<GatewayContext>, tool: &'static str, f: F) -> ToolHandler
where
    F: Fn(&GatewayContext, Value) -> Result<Value, GatewayError> + Send + Sync + 'static,
{
    let ctx = Arc::clone(ctx);
    let f = Arc::new(f);
    Box::new(move |args| {
        let ctx = Arc::clone(&ctx);
        let f = Arc::clone(&f);
        Box::pin(async move { f(&ctx, args).map_err(|e| ctx.envelope(&e, tool)) })
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| {
        GatewayError::refusal(
            ErrorCode::FileWriteFailed,
            format!("result does not serialise: {}", e),
        )
    })
}

fn require_str(args: &Value, key: &str) -> Result<String, GatewayError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(GatewayError::refusal(
            ErrorCode::InvalidInputType,
            format!("argument '{}' must be a string", key),
        )),
        None => Err(GatewayError::refusal(
            ErrorCode::InvalidInputValue,
            format!("argument '{}' is required", key),
        )),
    }
}

fn optional_str(args: &Value, key: &str) -> Result<Option<String>, GatewayError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(GatewayError::refusal(
            ErrorCode::InvalidInputType,
            format!("argument '{}' must be a string", key),
        )),
    }
}

fn optional_u64(args: &Value, key: &str) -> Result<Option<u64>, GatewayError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!("argument '{}' must be a non-negative integer", key),
            )
        }),
        Some(_) => Err(GatewayError::refusal(
            ErrorCode::InvalidInputType,
            format!("argument '{}' must be an integer", key),
        )),
    }
}

fn require_bool(args: &Value, key: &str) -> Result<bool, GatewayError> {
    match args.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(GatewayError::refusal(
            ErrorCode::InvalidInputType,
            format!("argument '{}' must be a boolean", key),
        )),
        None => Err(GatewayError::refusal(
            ErrorCode::InvalidInputValue,
            format!("argument '{}' is required", key),
        )),
    }
}

fn parse_acks(args: &Value) -> Result<RecoveryAcks, GatewayError> {
    Ok(RecoveryAcks {
        understood_reason: require_bool(args, "understood_reason")?,
        understood_failure: require_bool(args, "understood_failure")?,
        understood_forbidden_operations: require_bool(args, "understood_forbidden_operations")?,
        responsibility_acknowledged: require_bool(args, "responsibility_acknowledged")?,
    })
}

fn require_role(
    ctx: &GatewayContext,
    role: OperatorRole,
    tool: &str,
) -> Result<(), GatewayError> {
    match ctx.operator_role() {
        Some(actual) if actual == role => Ok(()),
        Some(actual) => Err(GatewayError::refusal(
            ErrorCode::RoleMismatch,
            format!("{} is available to the {} role, not {}", tool, role, actual),
        )),
        None => Err(GatewayError::refusal(
            ErrorCode::SessionNotInitialized,
            "begin_session must run first",
        )),
    }
}
