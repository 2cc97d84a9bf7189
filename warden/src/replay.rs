//! Forensic replay engine.
//!
//! Re-reads the audit log against the current workspace and reports what a
//! later investigator needs to know: tampering with the chain itself,
//! executions that lacked authority, policy refusals the gate recorded, and
//! divergent outcomes for identical inputs. Replay is strictly read-only;
//! a property test snapshots the workspace before and after and requires
//! byte equality.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditResult, GENESIS};
use crate::errors::{ErrorCode, GatewayError};
use crate::plans::store::PlanStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayVerdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCode {
    TamperDetectedBrokenHashChain,
    TamperDetectedSeqGap,
    TamperDetectedInvalidJson,
    AuthorityViolationExecutionWithoutPlan,
    AuthorityViolationRoleMismatch,
    PolicyViolationBlockedByGate,
    PolicyViolationInvariantViolation,
    DivergenceDetected,
}

impl FindingCode {
    /// Blocked-by-gate findings describe the gate doing its job; everything
    /// else indicts the history and fails the verdict.
    fn fails_verdict(&self) -> bool {
        !matches!(self, FindingCode::PolicyViolationBlockedByGate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFinding {
    pub code: FindingCode,
    pub seq: Option<u64>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub verdict: ReplayVerdict,
    pub plan_hash: String,
    pub entries_scanned: u64,
    pub findings: Vec<ReplayFinding>,
}

/// Replay the log for one plan. `range` restricts the per-entry analysis to
/// a `[start, end]` window of sequence numbers; chain verification always
/// covers the whole file.
pub fn replay(
    log_path: &Path,
    plans: &PlanStore,
    plan_hash: &str,
    range: Option<(u64, u64)>,
) -> Result<ReplayReport, GatewayError> {
    if !plans.exists(plan_hash) {
        return Err(GatewayError::refusal(
            ErrorCode::PlanNotFound,
            format!("no plan stored under hash {}", plan_hash),
        )
        .with_plan(plan_hash));
    }

    let mut findings = Vec::new();
    let entries = scan_chain(log_path, &mut findings)?;
    let entries_scanned = entries.len() as u64;

    let in_range = |seq: u64| match range {
        Some((start, end)) => seq >= start && seq <= end,
        None => true,
    };

    // Outcomes per args_hash under this plan, for divergence detection.
    let mut outcomes: HashMap<&str, (&AuditEntry, AuditResult)> = HashMap::new();

    for entry in &entries {
        if !in_range(entry.seq) {
            continue;
        }

        if entry.invariant_id.is_some() {
            findings.push(ReplayFinding {
                code: FindingCode::PolicyViolationInvariantViolation,
                seq: Some(entry.seq),
                detail: format!(
                    "entry {} records invariant violation {}",
                    entry.seq,
                    entry.invariant_id.as_deref().unwrap_or("?")
                ),
            });
        }

        if is_mutating_tool(&entry.tool) && entry.result == AuditResult::Ok {
            match entry.plan_hash.as_deref() {
                None => findings.push(ReplayFinding {
                    code: FindingCode::AuthorityViolationExecutionWithoutPlan,
                    seq: Some(entry.seq),
                    detail: format!(
                        "entry {}: {} succeeded without a plan hash",
                        entry.seq, entry.tool
                    ),
                }),
                Some(_) => {}
            }
            if entry.tool == "write_file" && entry.role != "EXECUTOR" {
                findings.push(ReplayFinding {
                    code: FindingCode::AuthorityViolationRoleMismatch,
                    seq: Some(entry.seq),
                    detail: format!(
                        "entry {}: write_file executed under role '{}'",
                        entry.seq, entry.role
                    ),
                });
            }
        }

        if entry.plan_hash.as_deref() != Some(plan_hash) {
            continue;
        }

        if entry.result == AuditResult::Refusal {
            findings.push(ReplayFinding {
                code: FindingCode::PolicyViolationBlockedByGate,
                seq: Some(entry.seq),
                detail: format!(
                    "entry {}: {} refused ({})",
                    entry.seq,
                    entry.tool,
                    entry
                        .error_code
                        .map(|c| c.as_str())
                        .unwrap_or("unspecified")
                ),
            });
        }

        if !entry.args_hash.is_empty() {
            match outcomes.get(entry.args_hash.as_str()) {
                Some((first, first_result)) if *first_result != entry.result => {
                    findings.push(ReplayFinding {
                        code: FindingCode::DivergenceDetected,
                        seq: Some(entry.seq),
                        detail: format!(
                            "entries {} and {} share args_hash {} with different results",
                            first.seq, entry.seq, entry.args_hash
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    outcomes.insert(entry.args_hash.as_str(), (entry, entry.result));
                }
            }
        }
    }

    let verdict = if findings.iter().any(|f| f.code.fails_verdict()) {
        ReplayVerdict::Fail
    } else {
        ReplayVerdict::Pass
    };

    Ok(ReplayReport {
        verdict,
        plan_hash: plan_hash.to_string(),
        entries_scanned,
        findings,
    })
}

/// Walk the raw log, recording tamper findings instead of failing, and
/// return whatever entries parse.
fn scan_chain(
    log_path: &Path,
    findings: &mut Vec<ReplayFinding>,
) -> Result<Vec<AuditEntry>, GatewayError> {
    let file = match fs::File::open(log_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(GatewayError::refusal(
                ErrorCode::FileReadFailed,
                format!("cannot open audit log {}: {}", log_path.display(), e),
            ));
        }
    };

    let mut entries: Vec<AuditEntry> = Vec::new();
    let mut prev_hash = GENESIS.to_string();
    let mut expected_seq = 1u64;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let number = index + 1;
        let line = line.map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileReadFailed,
                format!("cannot read audit log: {}", e),
            )
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                findings.push(ReplayFinding {
                    code: FindingCode::TamperDetectedInvalidJson,
                    seq: None,
                    detail: format!("line {} is not a valid audit record: {}", number, e),
                });
                continue;
            }
        };
        if entry.seq != expected_seq {
            findings.push(ReplayFinding {
                code: FindingCode::TamperDetectedSeqGap,
                seq: Some(entry.seq),
                detail: format!(
                    "line {}: seq {} where {} was expected",
                    number, entry.seq, expected_seq
                ),
            });
        }
        if entry.prev_hash != prev_hash || !entry.hash_is_consistent() {
            findings.push(ReplayFinding {
                code: FindingCode::TamperDetectedBrokenHashChain,
                seq: Some(entry.seq),
                detail: format!("line {}: hash chain does not link", number),
            });
        }
        prev_hash = entry.entry_hash.clone();
        expected_seq = entry.seq + 1;
        entries.push(entry);
    }
    Ok(entries)
}

fn is_mutating_tool(tool: &str) -> bool {
    matches!(tool, "write_file" | "bootstrap_create_foundation_plan")
}
