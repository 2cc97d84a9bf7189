//! Shared fixtures for the end-to-end suites.
#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;

use warden::gate::WriteRequest;
use warden::{GatewayConfig, GatewayContext};

/// A plan that lints clean, parameterised by allowlist and verification
/// commands.
pub fn approved_plan(allowlist: &[&str], verification: &[&str]) -> String {
    let allow_items: String = allowlist.iter().map(|e| format!("- {}\n", e)).collect();
    let verify_items: String = verification.iter().map(|e| format!("- {}\n", e)).collect();
    format!(
        "---\n\
         STATUS: APPROVED\n\
         SCOPE: gateway-managed source edits\n\
         VERSION: 1\n\
         CREATED: 2026-07-01\n\
         PURPOSE: end-to-end exercise of the governed write path\n\
         ---\n\
         \n\
         ## Plan Metadata\n\
         - Author: operations\n\
         - Review: recorded in the approval record\n\
         \n\
         ## Scope & Constraints\n\
         - every write is limited to the path allowlist below\n\
         \n\
         ## Phase Definitions\n\
         \n\
         ### Phase ONE\n\
         - Phase ID: ONE\n\
         - Objective: Write the approved demonstration files.\n\
         - Allowed operations: create and edit files inside the allowlist\n\
         - Forbidden operations: deleting existing tests\n\
         - Required intent artifacts: a written rationale for every file\n\
         - Verification commands: true\n\
         - Expected outcomes: the demonstration files exist with approved content\n\
         - Failure stop conditions: any verification command exits non-zero\n\
         \n\
         ## Path Allowlist\n\
         {allow_items}\
         \n\
         ## Verification Gates\n\
         {verify_items}\
         \n\
         ## Forbidden Actions\n\
         - writing outside the allowlist\n\
         - weakening verification gates\n\
         \n\
         ## Rollback / Failure Policy\n\
         - restore the prior bytes and halt the phase\n"
    )
}

pub struct GovernedWorkspace {
    pub dir: TempDir,
    pub ctx: GatewayContext,
    pub plan_hash: String,
}

impl GovernedWorkspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh context over the same workspace, as a second process would
    /// see it.
    pub fn reconnect(&self, operator: &str, role: &str) -> GatewayContext {
        let ctx = GatewayContext::new(GatewayConfig::default());
        ctx.begin_session(self.root().to_str().unwrap(), operator, role)
            .unwrap();
        ctx
    }
}

/// Workspace with a locked root, an EXECUTOR session past the prompt gate,
/// and one approved plan covering `src/`.
pub fn executor_workspace() -> GovernedWorkspace {
    executor_workspace_with(GatewayConfig::default(), &["src/"], &["true"])
}

pub fn executor_workspace_with(
    config: GatewayConfig,
    allowlist: &[&str],
    verification: &[&str],
) -> GovernedWorkspace {
    let dir = TempDir::new().unwrap();
    let ctx = GatewayContext::new(config);
    ctx.begin_session(dir.path().to_str().unwrap(), "op-1", "EXECUTOR")
        .unwrap();
    ctx.read_prompt("EXECUTOR_CANONICAL").unwrap();
    let plan_hash = ctx
        .plan_store()
        .unwrap()
        .put(&approved_plan(allowlist, verification))
        .unwrap();
    GovernedWorkspace {
        dir,
        ctx,
        plan_hash,
    }
}

/// A well-formed content-mode write request against `plan_hash`.
pub fn write_request(path: &str, content: &str, plan_hash: &str) -> WriteRequest {
    WriteRequest {
        path: path.to_string(),
        content: Some(content.to_string()),
        patch: None,
        prior_hash: None,
        plan_hash: plan_hash.to_string(),
        phase_id: "ONE".to_string(),
        role: "EXECUTABLE".to_string(),
        purpose: "demo".to_string(),
        connected_via: "cli".to_string(),
        failure_modes: "none".to_string(),
        intent: "twenty-one character intent string here".to_string(),
        risk_acknowledgment: None,
    }
}

/// A well-formed patch-mode write request against `plan_hash`.
pub fn patch_request(path: &str, patch: &str, plan_hash: &str) -> WriteRequest {
    let mut request = write_request(path, "", plan_hash);
    request.content = None;
    request.patch = Some(patch.to_string());
    request
}
