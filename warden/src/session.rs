//! Per-process session state.
//!
//! One session per gateway process: a random id minted at startup, the
//! operator identity bound once, the prompt-gate record, and the fatigue
//! counters. Nothing here is shared across processes.

use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::errors::{ErrorCode, GatewayError};

/// Operator roles recognised by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorRole {
    Planner,
    Executor,
    Owner,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorRole::Planner => "PLANNER",
            OperatorRole::Executor => "EXECUTOR",
            OperatorRole::Owner => "OWNER",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GatewayError> {
        match s {
            "PLANNER" => Ok(OperatorRole::Planner),
            "EXECUTOR" => Ok(OperatorRole::Executor),
            "OWNER" => Ok(OperatorRole::Owner),
            other => Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!("unknown operator role '{}'", other),
            )),
        }
    }
}

impl std::fmt::Display for OperatorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two canonical role prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptName {
    #[serde(rename = "PLANNER_CANONICAL")]
    PlannerCanonical,
    #[serde(rename = "EXECUTOR_CANONICAL")]
    ExecutorCanonical,
}

impl PromptName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptName::PlannerCanonical => "PLANNER_CANONICAL",
            PromptName::ExecutorCanonical => "EXECUTOR_CANONICAL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, GatewayError> {
        match s {
            "PLANNER_CANONICAL" => Ok(PromptName::PlannerCanonical),
            "EXECUTOR_CANONICAL" => Ok(PromptName::ExecutorCanonical),
            other => Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!("unknown prompt '{}'", other),
            )),
        }
    }

    /// The role this prompt belongs to.
    pub fn role(&self) -> OperatorRole {
        match self {
            PromptName::PlannerCanonical => OperatorRole::Planner,
            PromptName::ExecutorCanonical => OperatorRole::Executor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub operator_id: Option<String>,
    pub operator_role: Option<OperatorRole>,
    /// Which canonical prompt this session fetched, if any.
    pub prompt_fetched: Option<PromptName>,
    /// Approvals since the last mandatory pause.
    pub consecutive_approvals: u32,
    pub approvals_this_session: u32,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            session_id: uuid::Uuid::new_v4().to_string(),
            operator_id: None,
            operator_role: None,
            prompt_fetched: None,
            consecutive_approvals: 0,
            approvals_this_session: 0,
        }
    }

    /// Bind the operator identity. Bound once; a rebind with a different
    /// identity or role is refused.
    pub fn bind_operator(&mut self, id: &str, role: OperatorRole) -> Result<(), GatewayError> {
        if id.trim().is_empty() {
            return Err(GatewayError::refusal(
                ErrorCode::OperatorIdentityMissing,
                "operator_id must be non-empty",
            ));
        }
        match (&self.operator_id, self.operator_role) {
            (None, _) => {
                self.operator_id = Some(id.to_string());
                self.operator_role = Some(role);
                Ok(())
            }
            (Some(existing), Some(existing_role)) if existing == id && existing_role == role => {
                Ok(())
            }
            _ => Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "operator identity is bound once per session",
            )),
        }
    }

    pub fn record_prompt(&mut self, prompt: PromptName) {
        self.prompt_fetched = Some(prompt);
    }

    /// The prompt gate: the caller's canonical prompt must have been fetched
    /// this session.
    pub fn require_prompt(&self, prompt: PromptName) -> Result<(), GatewayError> {
        match self.prompt_fetched {
            Some(fetched) if fetched == prompt => Ok(()),
            _ => Err(GatewayError::refusal(
                ErrorCode::PromptGateLocked,
                format!(
                    "the {} prompt must be fetched before this tool runs",
                    prompt.as_str()
                ),
            )),
        }
    }

    /// Fatigue guard: refuse once either approval counter crosses its limit,
    /// then count the approval.
    pub fn record_approval(&mut self, config: &GatewayConfig) -> Result<(), GatewayError> {
        if self.consecutive_approvals >= config.consecutive_approval_limit {
            return Err(GatewayError::refusal(
                ErrorCode::OperatorFatigue,
                format!(
                    "{} consecutive approvals; a pause is required before the next one",
                    self.consecutive_approvals
                ),
            ));
        }
        if self.approvals_this_session >= config.session_approval_limit {
            return Err(GatewayError::refusal(
                ErrorCode::OperatorFatigue,
                format!(
                    "{} approvals this session; start a fresh session",
                    self.approvals_this_session
                ),
            ));
        }
        self.consecutive_approvals += 1;
        self.approvals_this_session += 1;
        Ok(())
    }

    /// A mandatory pause resets the consecutive counter only.
    pub fn record_pause(&mut self) {
        self.consecutive_approvals = 0;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_binds_once() {
        let mut session = SessionState::new();
        session.bind_operator("alice", OperatorRole::Executor).unwrap();
        session.bind_operator("alice", OperatorRole::Executor).unwrap();
        let err = session
            .bind_operator("mallory", OperatorRole::Executor)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    }

    #[test]
    fn empty_operator_is_missing_identity() {
        let mut session = SessionState::new();
        let err = session.bind_operator("  ", OperatorRole::Planner).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperatorIdentityMissing);
    }

    #[test]
    fn prompt_gate_requires_the_matching_prompt() {
        let mut session = SessionState::new();
        assert_eq!(
            session
                .require_prompt(PromptName::ExecutorCanonical)
                .unwrap_err()
                .code(),
            ErrorCode::PromptGateLocked
        );
        session.record_prompt(PromptName::PlannerCanonical);
        assert!(session.require_prompt(PromptName::ExecutorCanonical).is_err());
        session.record_prompt(PromptName::ExecutorCanonical);
        assert!(session.require_prompt(PromptName::ExecutorCanonical).is_ok());
    }

    #[test]
    fn consecutive_limit_trips_and_pause_resets() {
        let config = GatewayConfig::default();
        let mut session = SessionState::new();
        for _ in 0..config.consecutive_approval_limit {
            session.record_approval(&config).unwrap();
        }
        let err = session.record_approval(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperatorFatigue);
        session.record_pause();
        session.record_approval(&config).unwrap();
    }

    #[test]
    fn session_limit_is_not_reset_by_pauses() {
        let mut config = GatewayConfig::default();
        config.consecutive_approval_limit = 1000;
        config.session_approval_limit = 3;
        let mut session = SessionState::new();
        for _ in 0..3 {
            session.record_approval(&config).unwrap();
            session.record_pause();
        }
        let err = session.record_approval(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperatorFatigue);
    }
}
