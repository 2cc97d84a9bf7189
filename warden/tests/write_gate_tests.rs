//! End-to-end exercises of the write gate.

mod common;

use common::{
    approved_plan, executor_workspace, executor_workspace_with, patch_request, write_request,
};
use pretty_assertions::assert_eq;
use warden::audit::AuditResult;
use warden::{ErrorCode, GatewayConfig, GatewayContext};

#[test]
fn happy_write_lands_bytes_and_one_ok_entry() {
    let ws = executor_workspace();
    let request = write_request("src/a.txt", "hello\n", &ws.plan_hash);
    let outcome = ws.ctx.write_file(&request).unwrap();
    assert_eq!(outcome.path, "src/a.txt");
    assert_eq!(outcome.bytes_written, 6);

    let on_disk = std::fs::read_to_string(ws.root().join("src/a.txt")).unwrap();
    assert_eq!(on_disk, "hello\n");

    let entries = ws.ctx.read_audit_log(None, None).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.result, AuditResult::Ok);
    assert_eq!(entry.plan_hash.as_deref(), Some(ws.plan_hash.as_str()));
    assert_eq!(entry.prev_hash, "GENESIS");
    assert_eq!(entry.tool, "write_file");
}

#[test]
fn stub_content_is_refused_and_audited() {
    let ws = executor_workspace();
    let request = write_request("src/x.js", "function f(){}", &ws.plan_hash);
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyViolation);
    assert!(err.message().contains("empty function body"));
    assert!(!ws.root().join("src/x.js").exists());

    let entries = ws.ctx.read_audit_log(None, None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, AuditResult::Refusal);
    assert_eq!(entries[0].error_code, Some(ErrorCode::PolicyViolation));
}

#[test]
fn path_traversal_is_refused_before_any_write() {
    let ws = executor_workspace();
    let request = write_request("../evil.txt", "boom\n", &ws.plan_hash);
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PathTraversal);
    assert!(!ws.root().parent().unwrap().join("evil.txt").exists());
}

#[test]
fn unknown_plan_hash_is_not_approved() {
    let ws = executor_workspace();
    let request = write_request("src/a.txt", "hello\n", &"0".repeat(64));
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PlanNotApproved);
    assert!(!ws.root().join("src/a.txt").exists());
}

#[test]
fn write_without_prompt_gate_is_refused() {
    let dir = tempfile::TempDir::new().unwrap();
    let ctx = GatewayContext::new(GatewayConfig::default());
    ctx.begin_session(dir.path().to_str().unwrap(), "op-1", "EXECUTOR")
        .unwrap();
    let plan_hash = ctx
        .plan_store()
        .unwrap()
        .put(&approved_plan(&["src/"], &["true"]))
        .unwrap();
    let err = ctx
        .write_file(&write_request("src/a.txt", "hello\n", &plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PromptGateLocked);
}

#[test]
fn short_intent_is_refused() {
    let ws = executor_workspace();
    let mut request = write_request("src/a.txt", "hello\n", &ws.plan_hash);
    request.intent = "too short".to_string();
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
}

#[test]
fn path_outside_allowlist_is_refused() {
    let ws = executor_workspace();
    let request = write_request("docs/notes.txt", "note\n", &ws.plan_hash);
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyViolation);
    assert!(!ws.root().join("docs/notes.txt").exists());
}

#[test]
fn failed_verification_command_reverts_the_write() {
    let ws = executor_workspace_with(GatewayConfig::default(), &["src/"], &["false"]);
    let err = ws
        .ctx
        .write_file(&write_request("src/a.txt", "hello\n", &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PostWriteVerificationFailed);
    // The newly created file is gone again.
    assert!(!ws.root().join("src/a.txt").exists());

    // The refusal is on the record; the failure is fatal so the workspace
    // is halted.
    let other = GatewayContext::new(GatewayConfig::default());
    other
        .begin_session(ws.root().to_str().unwrap(), "op-2", "EXECUTOR")
        .unwrap();
    assert!(other.kill_switch_engaged());
}

#[test]
fn failed_verification_restores_prior_bytes() {
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request("src/a.txt", "first version\n", &ws.plan_hash))
        .unwrap();

    // A second plan whose gate always fails.
    let failing_hash = ws
        .ctx
        .plan_store()
        .unwrap()
        .put(&approved_plan(&["src/"], &["false"]))
        .unwrap();
    let err = ws
        .ctx
        .write_file(&write_request("src/a.txt", "second version\n", &failing_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PostWriteVerificationFailed);
    let on_disk = std::fs::read_to_string(ws.root().join("src/a.txt")).unwrap();
    assert_eq!(on_disk, "first version\n");
}

#[test]
fn fatigue_guard_trips_after_consecutive_approvals() {
    let mut config = GatewayConfig::default();
    config.consecutive_approval_limit = 3;
    let ws = executor_workspace_with(config, &["src/"], &["true"]);
    for i in 0..3 {
        ws.ctx
            .write_file(&write_request(
                &format!("src/file-{}.txt", i),
                "content\n",
                &ws.plan_hash,
            ))
            .unwrap();
    }
    let err = ws
        .ctx
        .write_file(&write_request("src/file-3.txt", "content\n", &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OperatorFatigue);
}

#[test]
fn prior_hash_mismatch_is_refused() {
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request("src/a.txt", "original\n", &ws.plan_hash))
        .unwrap();
    let mut request = write_request("src/a.txt", "updated\n", &ws.plan_hash);
    request.prior_hash = Some("0".repeat(64));
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    assert_eq!(
        std::fs::read_to_string(ws.root().join("src/a.txt")).unwrap(),
        "original\n"
    );
}

#[test]
fn patch_write_applies_a_unified_diff() {
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request(
            "src/app.js",
            "const limit = 10;\nrun(limit);\n",
            &ws.plan_hash,
        ))
        .unwrap();

    let patch = "\
--- a/src/app.js
+++ b/src/app.js
@@ -1,2 +1,2 @@
-const limit = 10;
+const limit = 20;
 run(limit);
";
    let outcome = ws
        .ctx
        .write_file(&patch_request("src/app.js", patch, &ws.plan_hash))
        .unwrap();
    assert_eq!(outcome.path, "src/app.js");
    assert_eq!(
        std::fs::read_to_string(ws.root().join("src/app.js")).unwrap(),
        "const limit = 20;\nrun(limit);\n"
    );

    // Both writes are on the record.
    let entries = ws.ctx.read_audit_log(None, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.result == AuditResult::Ok));
}

#[test]
fn patch_that_does_not_apply_is_refused() {
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request("src/app.js", "actual line\n", &ws.plan_hash))
        .unwrap();

    let patch = "@@ -1,1 +1,1 @@\n-some other line\n+replacement\n";
    let err = ws
        .ctx
        .write_file(&patch_request("src/app.js", patch, &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    assert!(err.message().contains("does not apply"));
    assert_eq!(
        std::fs::read_to_string(ws.root().join("src/app.js")).unwrap(),
        "actual line\n"
    );
}

#[test]
fn patch_against_a_missing_file_is_refused() {
    let ws = executor_workspace();
    let patch = "@@ -1,1 +1,1 @@\n-a\n+b\n";
    let err = ws
        .ctx
        .write_file(&patch_request("src/new.txt", patch, &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    assert!(!ws.root().join("src/new.txt").exists());
}

#[test]
fn content_and_patch_together_are_refused() {
    let ws = executor_workspace();
    let mut request = write_request("src/a.txt", "hello\n", &ws.plan_hash);
    request.patch = Some("@@ -1,1 +1,1 @@\n-x\n+y\n".to_string());
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);

    let mut request = write_request("src/a.txt", "", &ws.plan_hash);
    request.content = None;
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
}

#[test]
fn patch_that_comments_out_prior_code_is_refused() {
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request(
            "src/app.js",
            "const limit = 10;\nrun(limit);\n",
            &ws.plan_hash,
        ))
        .unwrap();

    let patch = "@@ -2,1 +2,1 @@\n-run(limit);\n+// run(limit);\n";
    let err = ws
        .ctx
        .write_file(&patch_request("src/app.js", patch, &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommentOutDetected);
}

#[test]
fn high_risk_write_requires_verbatim_acknowledgment() {
    let ws = executor_workspace_with(GatewayConfig::default(), &[".github/"], &["true"]);
    let mut request = write_request(".github/workflows/ci.yml", "jobs: {}\n", &ws.plan_hash);
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    assert!(err.message().contains("HIGH risk"));
    assert!(!ws.root().join(".github/workflows/ci.yml").exists());

    // Partial acknowledgment is still a refusal.
    request.risk_acknowledgment = Some(vec![warden::gate::HIGH_RISK_CONSEQUENCES[0].to_string()]);
    let err = ws.ctx.write_file(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);

    // All three consequence strings, verbatim, let the write through.
    request.risk_acknowledgment = Some(
        warden::gate::HIGH_RISK_CONSEQUENCES
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    let outcome = ws.ctx.write_file(&request).unwrap();
    assert_eq!(outcome.risk, warden::gate::RiskLevel::High);
    assert!(ws.root().join(".github/workflows/ci.yml").exists());
}

#[test]
fn tampered_plan_is_fatal_at_write_time() {
    let ws = executor_workspace();
    let plan_path = ws
        .root()
        .join("docs/plans")
        .join(format!("{}.md", ws.plan_hash));
    std::fs::write(&plan_path, "doctored").unwrap();

    let err = ws
        .ctx
        .write_file(&write_request("src/a.txt", "hello\n", &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvPlanImmutable);
    assert!(ws.ctx.kill_switch_engaged());
}
