//! Kill-switch and safe-halt state machine.
//!
//! Any fatal integrity failure engages the kill-switch: the state file is
//! persisted before the error surfaces, a halt report is written, and from
//! then on only read-only tools execute. The state is sticky; the only way
//! out is the two-step owner recovery protocol, separated by a minimum
//! delay and gated on verbatim acknowledgment flags plus a one-shot
//! confirmation code bound to the exact halt state it was issued for.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json, sha256_hex};
use crate::errors::{ErrorCode, GatewayError};
use crate::plans::store::atomic_write;
use crate::session::OperatorRole;

/// The four explicit acknowledgments recovery demands, verbatim at both
/// steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAcks {
    pub understood_reason: bool,
    pub understood_failure: bool,
    pub understood_forbidden_operations: bool,
    pub responsibility_acknowledged: bool,
}

impl RecoveryAcks {
    pub fn all_set(&self) -> bool {
        self.understood_reason
            && self.understood_failure
            && self.understood_forbidden_operations
            && self.responsibility_acknowledged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryInitiation {
    pub initiated_at: DateTime<Utc>,
    pub confirmation_code: String,
    pub halt_report_path: String,
    pub acknowledgments: RecoveryAcks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub engaged: bool,
    pub trigger_failure_ids: Vec<String>,
    pub trigger_reason: String,
    pub engaged_at: Option<DateTime<Utc>>,
    pub invariant_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryInitiation>,
}

impl Default for KillSwitchState {
    fn default() -> Self {
        KillSwitchState {
            engaged: false,
            trigger_failure_ids: Vec::new(),
            trigger_reason: String::new(),
            engaged_at: None,
            invariant_ids: Vec::new(),
            recovery: None,
        }
    }
}

impl KillSwitchState {
    /// Digest of the halt state itself (recovery record excluded), binding a
    /// confirmation code to exactly this engagement.
    pub fn state_digest(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("recovery");
        }
        sha256_hex(canonical_json(&value).as_bytes())
    }
}

#[derive(Debug, Clone)]
pub struct KillSwitch {
    path: PathBuf,
    recovery_delay: Duration,
}

impl KillSwitch {
    pub fn new(path: PathBuf, recovery_delay: Duration) -> Self {
        KillSwitch {
            path,
            recovery_delay,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<KillSwitchState, GatewayError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::InvalidInputFormat,
                    format!("malformed kill-switch state {}: {}", self.path.display(), e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(KillSwitchState::default()),
            Err(e) => Err(GatewayError::refusal(
                ErrorCode::FileReadFailed,
                format!("cannot read kill-switch state: {}", e),
            )),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.load().map(|s| s.engaged).unwrap_or(true)
    }

    /// Engage and persist. Re-engaging an already-engaged switch merges the
    /// new trigger identifiers.
    pub fn engage(
        &self,
        failure_ids: &[String],
        reason: &str,
        invariant_ids: &[String],
    ) -> Result<KillSwitchState, GatewayError> {
        let mut state = self.load().unwrap_or_default();
        if !state.engaged {
            state.engaged = true;
            state.engaged_at = Some(Utc::now());
            state.trigger_reason = reason.to_string();
        }
        for id in failure_ids {
            if !state.trigger_failure_ids.contains(id) {
                state.trigger_failure_ids.push(id.clone());
            }
        }
        for id in invariant_ids {
            if !state.invariant_ids.contains(id) {
                state.invariant_ids.push(id.clone());
            }
        }
        // Any previously issued confirmation code dies with the state change.
        state.recovery = None;
        self.save(&state)?;
        tracing::error!(reason = %reason, "kill-switch engaged");
        Ok(state)
    }

    /// Recovery step one: owner identifies, supplies the halt report path and
    /// the four acknowledgments, and receives a one-shot confirmation code.
    pub fn initiate_recovery(
        &self,
        role: OperatorRole,
        halt_report_path: &str,
        acks: RecoveryAcks,
    ) -> Result<String, GatewayError> {
        if role != OperatorRole::Owner {
            return Err(GatewayError::refusal(
                ErrorCode::InsufficientPermissions,
                "recovery may only be initiated by the OWNER role",
            ));
        }
        let mut state = self.load()?;
        if !state.engaged {
            return Err(GatewayError::refusal(
                ErrorCode::RecoveryNotInitiated,
                "the kill-switch is not engaged",
            ));
        }
        if !acks.all_set() {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "all four acknowledgment flags must be set",
            ));
        }
        if halt_report_path.trim().is_empty() {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "halt_report_path must name the halt report being acknowledged",
            ));
        }

        let nonce = uuid::Uuid::new_v4().to_string();
        let code = sha256_hex(format!("{}:{}", state.state_digest(), nonce).as_bytes());
        state.recovery = Some(RecoveryInitiation {
            initiated_at: Utc::now(),
            confirmation_code: code.clone(),
            halt_report_path: halt_report_path.to_string(),
            acknowledgments: acks,
        });
        self.save(&state)?;
        Ok(code)
    }

    /// Recovery step two: after the delay, the owner re-sends the flags and
    /// the code. `preflight` runs the verification battery; only when it
    /// passes is the state file cleared.
    pub fn confirm_recovery(
        &self,
        role: OperatorRole,
        acks: RecoveryAcks,
        code: &str,
        preflight: impl FnOnce() -> Result<(), GatewayError>,
    ) -> Result<(), GatewayError> {
        if role != OperatorRole::Owner {
            return Err(GatewayError::refusal(
                ErrorCode::InsufficientPermissions,
                "recovery may only be confirmed by the OWNER role",
            ));
        }
        let mut state = self.load()?;
        if !state.engaged {
            return Err(GatewayError::refusal(
                ErrorCode::RecoveryNotInitiated,
                "the kill-switch is not engaged",
            ));
        }
        let Some(initiation) = state.recovery.clone() else {
            return Err(GatewayError::refusal(
                ErrorCode::RecoveryNotInitiated,
                "no recovery initiation on record",
            ));
        };
        if !acks.all_set() || acks != initiation.acknowledgments {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "acknowledgment flags must be re-sent verbatim",
            ));
        }
        if code != initiation.confirmation_code {
            // The code is one-shot: a wrong attempt burns it.
            state.recovery = None;
            self.save(&state)?;
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "confirmation code does not match; recovery must be re-initiated",
            ));
        }
        let elapsed = Utc::now().signed_duration_since(initiation.initiated_at);
        let required = chrono::Duration::from_std(self.recovery_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        if elapsed < required {
            return Err(GatewayError::refusal(
                ErrorCode::RecoveryDelayPending,
                format!(
                    "recovery confirmation requires {}s between steps; {}s elapsed",
                    required.num_seconds(),
                    elapsed.num_seconds().max(0)
                ),
            ));
        }

        preflight()?;

        std::fs::remove_file(&self.path).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot clear kill-switch state: {}", e),
            )
        })?;
        tracing::warn!("kill-switch disengaged by owner recovery");
        Ok(())
    }

    fn save(&self, state: &KillSwitchState) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileWriteFailed,
                    format!("cannot prepare kill-switch dir: {}", e),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot serialise kill-switch state: {}", e),
            )
        })?;
        atomic_write(&self.path, json.as_bytes())
    }
}

/// Render the halt report written at engagement time.
pub fn render_halt_report(state: &KillSwitchState) -> String {
    let mut out = String::new();
    out.push_str("# HALT REPORT\n\n");
    out.push_str(&format!(
        "Engaged at: {}\n",
        state
            .engaged_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    ));
    out.push_str(&format!("Reason: {}\n\n", state.trigger_reason));
    out.push_str("## Failure identifiers\n");
    for id in &state.trigger_failure_ids {
        out.push_str(&format!("- {}\n", id));
    }
    out.push_str("\n## Violated invariants\n");
    for id in &state.invariant_ids {
        out.push_str(&format!("- {}\n", id));
    }
    out.push_str(
        "\n## While halted\n\
         All mutating tools refuse with KILL_SWITCH_ENGAGED. Read-only tools\n\
         remain available for inspection.\n\
         \n\
         ## Recovery\n\
         An operator with the OWNER role initiates recovery with this report's\n\
         path and the four acknowledgment flags, waits out the mandatory delay,\n\
         then confirms with the issued code. Pre-flight verification of the\n\
         audit chain, the plan store, and governance state must pass before the\n\
         halt clears.\n",
    );
    out
}
