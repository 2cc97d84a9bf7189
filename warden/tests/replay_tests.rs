//! Replay determinism and purity.

mod common;

use std::collections::BTreeMap;
use std::path::Path;

use common::{executor_workspace, write_request};
use warden::replay::ReplayVerdict;
use warden::ErrorCode;

/// Recursive snapshot: relative path -> file bytes.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, root, out);
            } else if let Ok(bytes) = std::fs::read(&path) {
                let rel = path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned();
                out.insert(rel, bytes);
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test]
fn replay_of_a_clean_history_passes_and_is_deterministic() {
    let ws = executor_workspace();
    for i in 0..20 {
        ws.ctx
            .write_file(&write_request(
                &format!("src/file-{}.txt", i),
                &format!("content {}\n", i),
                &ws.plan_hash,
            ))
            .unwrap();
    }

    let first = ws.ctx.replay_execution(&ws.plan_hash, None, None).unwrap();
    let second = ws.ctx.replay_execution(&ws.plan_hash, None, None).unwrap();
    assert_eq!(first.verdict, ReplayVerdict::Pass);
    assert_eq!(first, second);
    assert_eq!(first.entries_scanned, 20);
}

#[test]
fn replay_does_not_mutate_the_workspace() {
    let ws = executor_workspace();
    for i in 0..5 {
        ws.ctx
            .write_file(&write_request(
                &format!("src/file-{}.txt", i),
                "content\n",
                &ws.plan_hash,
            ))
            .unwrap();
    }
    // Include a refusal in the history for replay to report on.
    let _ = ws
        .ctx
        .write_file(&write_request("src/stub.js", "function f(){}", &ws.plan_hash));

    let before = snapshot(ws.root());
    let report = ws.ctx.replay_execution(&ws.plan_hash, None, None).unwrap();
    let after = snapshot(ws.root());
    assert_eq!(before, after);
    assert!(!report.findings.is_empty());
}

#[test]
fn replay_of_unknown_plan_is_refused() {
    let ws = executor_workspace();
    let err = ws
        .ctx
        .replay_execution(&"0".repeat(64), None, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PlanNotFound);
}

#[test]
fn replay_range_limits_the_analysis_window() {
    let ws = executor_workspace();
    for i in 0..6 {
        ws.ctx
            .write_file(&write_request(
                &format!("src/file-{}.txt", i),
                "content\n",
                &ws.plan_hash,
            ))
            .unwrap();
    }
    let report = ws
        .ctx
        .replay_execution(&ws.plan_hash, Some(2), Some(4))
        .unwrap();
    assert_eq!(report.verdict, ReplayVerdict::Pass);
    assert_eq!(report.entries_scanned, 6);
}
