//! Attestation bundles over a governed workspace.

mod common;

use base64::Engine;
use common::{executor_workspace, write_request};
use warden::ErrorCode;

fn install_secret() {
    std::env::set_var(
        "WARDEN_ATTESTATION_SECRET",
        base64::engine::general_purpose::STANDARD.encode(b"attestation-test-secret"),
    );
}

#[test]
fn generate_and_verify_against_current_state() {
    install_secret();
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request("src/a.txt", "content\n", &ws.plan_hash))
        .unwrap();

    let bundle = ws.ctx.generate_attestation_bundle().unwrap();
    assert_eq!(bundle.algorithm, "HMAC-SHA256");
    assert_eq!(bundle.evidence.audit_entry_count, 1);
    assert_eq!(bundle.evidence.plan_hashes, vec![ws.plan_hash.clone()]);
    ws.ctx.verify_attestation_bundle(&bundle).unwrap();
}

#[test]
fn stale_bundle_fails_evidence_check() {
    install_secret();
    let ws = executor_workspace();
    ws.ctx
        .write_file(&write_request("src/a.txt", "content\n", &ws.plan_hash))
        .unwrap();
    let bundle = ws.ctx.generate_attestation_bundle().unwrap();

    // The workspace moves on; the old bundle no longer describes it.
    ws.ctx
        .write_file(&write_request("src/b.txt", "content\n", &ws.plan_hash))
        .unwrap();
    let err = ws.ctx.verify_attestation_bundle(&bundle).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AttestationEvidenceInvalid);
}

#[test]
fn export_writes_under_the_namespace() {
    install_secret();
    let ws = executor_workspace();
    let path = ws.ctx.export_attestation_bundle().unwrap();
    assert!(path.contains(".warden"));
    let raw = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["algorithm"], "HMAC-SHA256");
}

