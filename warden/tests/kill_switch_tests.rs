//! Kill-switch stickiness and owner recovery end to end.

mod common;

use common::{executor_workspace, write_request};
use warden::kill_switch::RecoveryAcks;
use warden::{ErrorCode, GatewayConfig, GatewayContext};

fn acks() -> RecoveryAcks {
    RecoveryAcks {
        understood_reason: true,
        understood_failure: true,
        understood_forbidden_operations: true,
        responsibility_acknowledged: true,
    }
}

/// Break the audit chain so a read engages the kill-switch.
fn halt_workspace(ws: &common::GovernedWorkspace) -> String {
    ws.ctx
        .write_file(&write_request("src/a.txt", "content\n", &ws.plan_hash))
        .unwrap();
    let log_path = ws.root().join("audit-log.jsonl");
    let raw = std::fs::read_to_string(&log_path).unwrap();
    std::fs::write(&log_path, raw.replace("content_sha256", "edited")).unwrap();
    ws.ctx.read_audit_log(None, None).unwrap_err();
    assert!(ws.ctx.kill_switch_engaged());

    // The halt report exists and is the artifact recovery acknowledges.
    let reports_dir = ws.root().join(".warden/halt-reports");
    let report = std::fs::read_dir(&reports_dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    report.display().to_string()
}

/// Undo the doctored log so recovery pre-flight can pass. The workspace
/// stays halted until the owner protocol completes.
fn repair_log(ws: &common::GovernedWorkspace) {
    let log_path = ws.root().join("audit-log.jsonl");
    std::fs::remove_file(&log_path).unwrap();
    std::fs::remove_file(ws.root().join("src/a.txt")).unwrap();
}

#[test]
fn engaged_switch_refuses_mutations_until_recovery() {
    let ws = executor_workspace();
    let report_path = halt_workspace(&ws);
    repair_log(&ws);

    // Mutations refuse while engaged.
    let err = ws
        .ctx
        .write_file(&write_request("src/b.txt", "content\n", &ws.plan_hash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::KillSwitchEngaged);

    // Recovery needs the OWNER role.
    let err = ws.ctx.initiate_recovery(&report_path, acks()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientPermissions);

    // An owner session over the same workspace completes the protocol. The
    // governance count must match the store for pre-flight, which it does
    // (one plan seeded, zero counted is inconsistent -- align it first).
    let governance = ws.ctx.governance_store().unwrap();
    governance
        .save(&warden::governance::GovernanceState {
            bootstrap_enabled: false,
            approved_plans_count: 1,
        })
        .unwrap();

    let mut config = GatewayConfig::default();
    config.recovery_delay_secs = 0;
    let owner = GatewayContext::new(config);
    owner
        .begin_session(ws.root().to_str().unwrap(), "owner-1", "OWNER")
        .unwrap();
    let code = owner.initiate_recovery(&report_path, acks()).unwrap();
    owner.confirm_recovery(acks(), &code).unwrap();
    assert!(!owner.kill_switch_engaged());

    // The disengagement is on the audit record.
    let entries = owner.read_audit_log(None, None).unwrap();
    assert_eq!(entries.last().unwrap().tool, "confirm_recovery");

    // Mutations flow again through a fresh executor session.
    let executor = ws.reconnect("op-2", "EXECUTOR");
    executor.read_prompt("EXECUTOR_CANONICAL").unwrap();
    executor
        .write_file(&write_request("src/b.txt", "content\n", &ws.plan_hash))
        .unwrap();
}

#[test]
fn recovery_preflight_blocks_while_chain_is_still_broken() {
    let ws = executor_workspace();
    let report_path = halt_workspace(&ws);
    // Chain left broken on purpose.

    let governance = ws.ctx.governance_store().unwrap();
    governance
        .save(&warden::governance::GovernanceState {
            bootstrap_enabled: false,
            approved_plans_count: 1,
        })
        .unwrap();

    let mut config = GatewayConfig::default();
    config.recovery_delay_secs = 0;
    let owner = GatewayContext::new(config);
    owner
        .begin_session(ws.root().to_str().unwrap(), "owner-1", "OWNER")
        .unwrap();
    let code = owner.initiate_recovery(&report_path, acks()).unwrap();
    let err = owner.confirm_recovery(acks(), &code).unwrap_err();
    assert!(err.is_fatal());
    assert!(owner.kill_switch_engaged());
}

#[test]
fn confirmation_before_the_delay_is_refused() {
    let ws = executor_workspace();
    let report_path = halt_workspace(&ws);
    repair_log(&ws);

    let owner = GatewayContext::new(GatewayConfig::default());
    owner
        .begin_session(ws.root().to_str().unwrap(), "owner-1", "OWNER")
        .unwrap();
    let code = owner.initiate_recovery(&report_path, acks()).unwrap();
    let err = owner.confirm_recovery(acks(), &code).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RecoveryDelayPending);
    assert!(owner.kill_switch_engaged());
}

#[test]
fn altered_ack_flags_are_refused_at_confirmation() {
    let ws = executor_workspace();
    let report_path = halt_workspace(&ws);
    repair_log(&ws);

    let mut config = GatewayConfig::default();
    config.recovery_delay_secs = 0;
    let owner = GatewayContext::new(config);
    owner
        .begin_session(ws.root().to_str().unwrap(), "owner-1", "OWNER")
        .unwrap();
    let code = owner.initiate_recovery(&report_path, acks()).unwrap();
    let mut altered = acks();
    altered.understood_failure = false;
    let err = owner.confirm_recovery(altered, &code).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    assert!(owner.kill_switch_engaged());
}
