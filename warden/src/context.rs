//! Gateway context: one per process.
//!
//! Owns the configuration, the workspace resolver, and the session state,
//! and exposes every tool entry point over them. Stores and logs are cheap
//! path-bound handles constructed on demand from the resolver, so nothing
//! here caches a path that could diverge from the locked root.
//!
//! Fatal errors funnel through [`GatewayContext::handle_fatal`], which
//! persists the kill-switch state and writes the halt report before the
//! error surfaces to the transport.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::attestation::{AttestationBundle, AttestationSigner, EvidenceBundle};
use crate::audit::lock::WorkspaceLock;
use crate::audit::log::{AuditHead, AuditLog};
use crate::audit::{AuditDraft, AuditEntry, AuditResult};
use crate::canonical::sha256_hex;
use crate::config::GatewayConfig;
use crate::errors::{ErrorCode, ErrorEnvelope, FailureKind, GatewayError};
use crate::gate::{WriteGate, WriteOutcome, WriteRequest};
use crate::governance::{GovernanceState, GovernanceStore};
use crate::invariant::{InvariantId, FAILURE_AUDIT, FAILURE_STARTUP};
use crate::kill_switch::{render_halt_report, KillSwitch, RecoveryAcks};
use crate::plans::linter::{lint, LintReport};
use crate::plans::store::{PlanStore, PlanSummary};
use crate::policy::PolicyEngine;
use crate::prompts;
use crate::replay::{replay, ReplayReport};
use crate::session::{OperatorRole, SessionState};
use crate::workspace::WorkspaceResolver;

/// Environment variable carrying the base64 bootstrap secret.
pub const BOOTSTRAP_SECRET_ENV: &str = "WARDEN_BOOTSTRAP_SECRET";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapOutcome {
    pub plan_hash: String,
    pub governance: GovernanceState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub audit_entries: u64,
    pub audit_head: Option<AuditHead>,
    pub plans_verified: usize,
    pub governance_consistent: bool,
    pub attested_writes_checked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub workspace_root: String,
    pub operator_id: String,
    pub operator_role: String,
    pub kill_switch_engaged: bool,
}

pub struct GatewayContext {
    config: GatewayConfig,
    resolver: WorkspaceResolver,
    session: Mutex<SessionState>,
    policy: PolicyEngine,
}

impl GatewayContext {
    pub fn new(config: GatewayConfig) -> Self {
        let policy = PolicyEngine::new(&config);
        GatewayContext {
            config,
            resolver: WorkspaceResolver::new(),
            session: Mutex::new(SessionState::new()),
            policy,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn resolver(&self) -> &WorkspaceResolver {
        &self.resolver
    }

    pub fn session_id(&self) -> String {
        self.lock_session().session_id.clone()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ------------------------------------------------------------------
    // Component handles (paths come from the resolver, nowhere else)
    // ------------------------------------------------------------------

    fn workspace_lock(&self) -> Result<WorkspaceLock, GatewayError> {
        Ok(WorkspaceLock::new(
            self.resolver.audit_lock_dir()?,
            Duration::from_secs(self.config.stale_lock_secs),
        ))
    }

    pub fn audit_log(&self) -> Result<AuditLog, GatewayError> {
        Ok(AuditLog::new(
            self.resolver.audit_log_path()?,
            self.workspace_lock()?,
            Duration::from_secs(self.config.lock_timeout_secs),
        ))
    }

    pub fn plan_store(&self) -> Result<PlanStore, GatewayError> {
        Ok(PlanStore::new(self.resolver.plans_dir()?))
    }

    pub fn governance_store(&self) -> Result<GovernanceStore, GatewayError> {
        Ok(GovernanceStore::new(self.resolver.governance_path()?))
    }

    pub fn kill_switch(&self) -> Result<KillSwitch, GatewayError> {
        Ok(KillSwitch::new(
            self.resolver.kill_switch_path()?,
            Duration::from_secs(self.config.recovery_delay_secs),
        ))
    }

    pub fn kill_switch_engaged(&self) -> bool {
        self.kill_switch()
            .map(|ks| ks.is_engaged())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Failure plumbing
    // ------------------------------------------------------------------

    /// Build the wire envelope for a failure in `tool`.
    pub fn envelope(&self, err: &GatewayError, tool: &str) -> ErrorEnvelope {
        let session = self.lock_session();
        let role = session.operator_role.map(|r| r.as_str().to_string());
        let root = self
            .resolver
            .root()
            .ok()
            .map(|p| p.display().to_string());
        ErrorEnvelope::from_error(
            err,
            Some(tool),
            role.as_deref(),
            Some(session.session_id.as_str()),
            root.as_deref(),
        )
    }

    /// Engage the kill-switch for a fatal error: persist the state, write the
    /// halt report, and record the engagement when the log is still usable.
    pub fn handle_fatal(&self, err: &GatewayError, failure_class: &str) {
        let Ok(ks) = self.kill_switch() else {
            tracing::error!(error = %err, "fatal error before any workspace was locked");
            return;
        };
        // State changes share the audit lock; if it cannot be had in time the
        // engagement still must not be lost.
        let _guard = self
            .workspace_lock()
            .ok()
            .and_then(|lock| lock.acquire(Duration::from_secs(self.config.lock_timeout_secs)).ok());
        let invariant_ids: Vec<String> = err
            .invariant_id()
            .map(|id| vec![id.as_str().to_string()])
            .unwrap_or_default();
        let failure_ids = vec![failure_class.to_string()];
        match ks.engage(&failure_ids, &err.message(), &invariant_ids) {
            Ok(state) => {
                if let Ok(dir) = self.resolver.halt_reports_dir() {
                    let _ = std::fs::create_dir_all(&dir);
                    let name = format!("halt-{}.md", Utc::now().format("%Y%m%dT%H%M%SZ"));
                    let _ = std::fs::write(dir.join(name), render_halt_report(&state));
                }
            }
            Err(engage_err) => {
                tracing::error!(error = %engage_err, "failed to persist kill-switch engagement");
            }
        }
    }

    /// Route an error: fatal ones engage the kill-switch first.
    pub fn surface(&self, err: GatewayError) -> GatewayError {
        if err.is_fatal() {
            let class = match err.invariant_id() {
                Some(InvariantId::AuditChain) => FAILURE_AUDIT,
                _ => err.code().as_str(),
            };
            self.handle_fatal(&err, class);
        }
        err
    }

    /// Best-effort refusal/error audit entry for a non-write tool.
    fn audit_tool_failure(&self, tool: &str, args_hash: &str, err: &GatewayError) {
        if !self.resolver.is_locked() || err.code() == ErrorCode::KillSwitchEngaged {
            return;
        }
        let Ok(log) = self.audit_log() else {
            return;
        };
        let session = self.lock_session();
        let result = match err.code().failure_kind() {
            FailureKind::Refusal => AuditResult::Refusal,
            FailureKind::Error => AuditResult::Error,
        };
        let draft = AuditDraft {
            session_id: session.session_id.clone(),
            operator_id: session.operator_id.clone().unwrap_or_default(),
            role: session
                .operator_role
                .map(|r| r.as_str().to_string())
                .unwrap_or_default(),
            tool: tool.to_string(),
            plan_hash: err.plan_hash().map(str::to_string),
            phase_id: err.phase_id().map(str::to_string),
            args_hash: args_hash.to_string(),
            result,
            error_code: Some(err.code()),
            invariant_id: err.invariant_id().map(|id| id.as_str().to_string()),
            notes: err.message(),
        };
        drop(session);
        if let Err(append_err) = log.append(draft) {
            tracing::error!(error = %append_err, tool, "failed to audit a refusal");
        }
    }

    // ------------------------------------------------------------------
    // Tool surface
    // ------------------------------------------------------------------

    /// `begin_session`: lock the workspace root and bind the operator.
    pub fn begin_session(
        &self,
        workspace_root: &str,
        operator_id: &str,
        role: &str,
    ) -> Result<SessionInfo, GatewayError> {
        let role = OperatorRole::parse(role)?;
        let root = self.resolver.lock(Path::new(workspace_root))?;
        let mut session = self.lock_session();
        session.bind_operator(operator_id, role)?;
        Ok(SessionInfo {
            session_id: session.session_id.clone(),
            workspace_root: root.display().to_string(),
            operator_id: operator_id.to_string(),
            operator_role: role.as_str().to_string(),
            kill_switch_engaged: self.kill_switch_engaged(),
        })
    }

    /// `read_prompt`: fetch the caller's canonical prompt, satisfying the
    /// prompt gate and leaving the on-disk proof.
    pub fn read_prompt(&self, name: &str) -> Result<String, GatewayError> {
        let prompt = crate::session::PromptName::parse(name)?;
        let mut session = self.lock_session();
        let Some(role) = session.operator_role else {
            return Err(GatewayError::refusal(
                ErrorCode::SessionNotInitialized,
                "begin_session must run before read_prompt",
            ));
        };
        let entitled = prompts::prompt_for_role(role)?;
        if entitled != prompt {
            return Err(GatewayError::refusal(
                ErrorCode::RoleMismatch,
                format!(
                    "role {} fetches {}, not {}",
                    role,
                    entitled.as_str(),
                    prompt.as_str()
                ),
            ));
        }
        session.record_prompt(prompt);
        let session_id = session.session_id.clone();
        drop(session);
        prompts::write_session_proof(&self.resolver.sessions_dir()?, &session_id, prompt)?;
        Ok(prompts::prompt_text(prompt).to_string())
    }

    /// `list_plans`.
    pub fn list_plans(&self) -> Result<Vec<PlanSummary>, GatewayError> {
        self.plan_store()?.list().map_err(|e| self.surface(e))
    }

    /// `read_file`. Resource failures are retried once before surfacing.
    pub fn read_file(&self, path: &str) -> Result<String, GatewayError> {
        let resolved = self.resolver.resolve_read(path)?;
        let mut attempts = 0;
        loop {
            match std::fs::read_to_string(&resolved.absolute) {
                Ok(content) => return Ok(content),
                Err(e) if e.kind() != std::io::ErrorKind::NotFound && attempts == 0 => {
                    attempts += 1;
                }
                Err(e) => {
                    return Err(GatewayError::refusal(
                        ErrorCode::FileReadFailed,
                        format!("cannot read {}: {}", resolved.relative, e),
                    ));
                }
            }
        }
    }

    /// `write_file`: the full gate.
    pub fn write_file(&self, request: &WriteRequest) -> Result<WriteOutcome, GatewayError> {
        let plans = self.plan_store();
        let audit = self.audit_log();
        let kill_switch = self.kill_switch();
        let (plans, audit, kill_switch) = match (plans, audit, kill_switch) {
            (Ok(p), Ok(a), Ok(k)) => (p, a, k),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return Err(e),
        };
        let gate = WriteGate {
            config: &self.config,
            resolver: &self.resolver,
            plans: &plans,
            audit: &audit,
            kill_switch: &kill_switch,
            policy: &self.policy,
        };
        let mut session = self.lock_session();
        gate.execute(&mut session, request)
            .map_err(|e| self.surface(e))
    }

    /// `lint_plan`: never refuses, always returns findings.
    pub fn lint_plan(&self, content: &str, expected_hash: Option<&str>) -> LintReport {
        lint(content, expected_hash)
    }

    /// `bootstrap_create_foundation_plan`: the one-time write of the very
    /// first plan, HMAC-gated and flipping governance forever.
    pub fn bootstrap_create_foundation_plan(
        &self,
        plan_content: &str,
        hmac_payload: &str,
        hmac_signature: &str,
    ) -> Result<BootstrapOutcome, GatewayError> {
        let args_hash = sha256_hex(format!("{}:{}", hmac_payload, hmac_signature).as_bytes());
        self.bootstrap_inner(plan_content, hmac_payload, hmac_signature)
            .map_err(|err| {
                self.audit_tool_failure("bootstrap_create_foundation_plan", &args_hash, &err);
                self.surface(err)
            })
    }

    fn bootstrap_inner(
        &self,
        plan_content: &str,
        hmac_payload: &str,
        hmac_signature: &str,
    ) -> Result<BootstrapOutcome, GatewayError> {
        if self.kill_switch_engaged() {
            return Err(GatewayError::refusal(
                ErrorCode::KillSwitchEngaged,
                "the kill-switch is engaged; only read-only tools execute",
            ));
        }
        let session_snapshot = {
            let session = self.lock_session();
            if session.operator_role != Some(OperatorRole::Planner) {
                return Err(GatewayError::refusal(
                    ErrorCode::RoleMismatch,
                    "bootstrap_create_foundation_plan is available to the PLANNER role only",
                ));
            }
            session
                .require_prompt(crate::session::PromptName::PlannerCanonical)?;
            session.clone()
        };

        let governance = self.governance_store()?;
        if !governance.load()?.bootstrap_enabled {
            return Err(GatewayError::refusal(
                ErrorCode::BootstrapDisabled,
                "bootstrap already consumed for this workspace",
            ));
        }

        let secret = self.bootstrap_secret()?.ok_or_else(|| {
            GatewayError::refusal(
                ErrorCode::BootstrapDisabled,
                "no bootstrap secret provisioned; bootstrap is disabled",
            )
        })?;

        // The payload binds the signature to this exact plan content.
        let content_hash = sha256_hex(plan_content.as_bytes());
        if hmac_payload != content_hash {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "hmac_payload must be the SHA-256 of plan_content",
            ));
        }
        let mut mac = HmacSha256::new_from_slice(&secret).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::BootstrapDisabled,
                format!("bootstrap secret unusable: {}", e),
            )
        })?;
        mac.update(hmac_payload.as_bytes());
        let expected: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        if expected != hmac_signature.to_lowercase() {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidSignature,
                "bootstrap HMAC signature does not verify",
            ));
        }

        let report = lint(plan_content, None);
        if !report.passed {
            let first = report.errors.first();
            return Err(GatewayError::refusal(
                first
                    .map(|f| f.code)
                    .unwrap_or(ErrorCode::PlanNotEnforceable),
                format!(
                    "foundation plan fails lint: {}",
                    first.map(|f| f.message.as_str()).unwrap_or("unknown")
                ),
            ));
        }

        let plans = self.plan_store()?;
        let audit = self.audit_log()?;
        let args_hash = sha256_hex(format!("{}:{}", hmac_payload, hmac_signature).as_bytes());

        audit.with_lock(|audit_session| {
            // Re-check under the lock: two racing bootstraps must not both
            // succeed (INV_BOOTSTRAP_ONCE).
            let state = governance.load()?;
            if !state.bootstrap_enabled {
                return Err(GatewayError::refusal(
                    ErrorCode::BootstrapDisabled,
                    "bootstrap already consumed for this workspace",
                ));
            }
            let plan_hash = plans.put(plan_content)?;
            let flipped = GovernanceState {
                bootstrap_enabled: false,
                approved_plans_count: state.approved_plans_count + 1,
            };
            governance.save(&flipped)?;
            audit_session.append(AuditDraft {
                session_id: session_snapshot.session_id.clone(),
                operator_id: session_snapshot.operator_id.clone().unwrap_or_default(),
                role: session_snapshot
                    .operator_role
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_default(),
                tool: "bootstrap_create_foundation_plan".to_string(),
                plan_hash: Some(plan_hash.clone()),
                phase_id: None,
                args_hash: args_hash.clone(),
                result: AuditResult::Ok,
                error_code: None,
                invariant_id: None,
                notes: "foundation plan written; bootstrap disabled".to_string(),
            })?;
            Ok(BootstrapOutcome {
                plan_hash,
                governance: flipped,
            })
        })
    }

    fn bootstrap_secret(&self) -> Result<Option<Vec<u8>>, GatewayError> {
        if let Ok(raw) = std::env::var(BOOTSTRAP_SECRET_ENV) {
            if !raw.trim().is_empty() {
                return base64::engine::general_purpose::STANDARD
                    .decode(raw.trim())
                    .map(Some)
                    .map_err(|e| {
                        GatewayError::refusal(
                            ErrorCode::InvalidInputFormat,
                            format!("{} is not valid base64: {}", BOOTSTRAP_SECRET_ENV, e),
                        )
                    });
            }
        }
        let path = self.resolver.bootstrap_secret_path()?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let value: serde_json::Value = serde_json::from_str(&raw)?;
                let encoded = value
                    .get("secret")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map(Some)
                    .map_err(|e| {
                        GatewayError::refusal(
                            ErrorCode::InvalidInputFormat,
                            format!("bootstrap secret file is not valid base64: {}", e),
                        )
                    })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::refusal(
                ErrorCode::FileReadFailed,
                format!("cannot read bootstrap secret: {}", e),
            )),
        }
    }

    /// `read_audit_log`: read-through integrity verification; tamper engages
    /// the kill-switch.
    pub fn read_audit_log(
        &self,
        seq_start: Option<u64>,
        seq_end: Option<u64>,
    ) -> Result<Vec<AuditEntry>, GatewayError> {
        let entries = self
            .audit_log()?
            .read_verified()
            .map_err(|e| self.surface(e))?;
        Ok(entries
            .into_iter()
            .filter(|e| seq_start.map(|s| e.seq >= s).unwrap_or(true))
            .filter(|e| seq_end.map(|s| e.seq <= s).unwrap_or(true))
            .collect())
    }

    /// `replay_execution`.
    pub fn replay_execution(
        &self,
        plan_hash: &str,
        seq_start: Option<u64>,
        seq_end: Option<u64>,
    ) -> Result<ReplayReport, GatewayError> {
        let range = match (seq_start, seq_end) {
            (None, None) => None,
            (start, end) => Some((start.unwrap_or(1), end.unwrap_or(u64::MAX))),
        };
        replay(
            &self.resolver.audit_log_path()?,
            &self.plan_store()?,
            plan_hash,
            range,
        )
    }

    /// `verify_workspace_integrity`: the startup self-audit battery, also
    /// callable at any time.
    pub fn verify_workspace_integrity(&self) -> Result<IntegrityReport, GatewayError> {
        let audit = self.audit_log()?;
        let entries = audit.read_verified().map_err(|e| self.surface(e))?;
        let head = entries.last().map(|e| AuditHead {
            seq: e.seq,
            entry_hash: e.entry_hash.clone(),
        });

        let plans_verified = self
            .plan_store()?
            .verify_all()
            .map_err(|e| self.surface(e))?;

        let governance = self.governance_store()?.load()?;
        if !governance.is_consistent() {
            let err = GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!(
                    "governance state inconsistent: bootstrap_enabled={} with {} approved plans",
                    governance.bootstrap_enabled, governance.approved_plans_count
                ),
            );
            return Err(err);
        }

        // Sweep: the last successful write per path must still match the
        // attested content hash; divergence means an unattested mutation.
        let mut last_writes: std::collections::BTreeMap<String, String> =
            std::collections::BTreeMap::new();
        for entry in &entries {
            if entry.tool != "write_file" || entry.result != AuditResult::Ok {
                continue;
            }
            let mut path = None;
            let mut hash = None;
            for part in entry.notes.split(';') {
                let part = part.trim();
                if let Some(p) = part.strip_prefix("path=") {
                    path = Some(p.to_string());
                }
                if let Some(h) = part.strip_prefix("content_sha256=") {
                    hash = Some(h.to_string());
                }
            }
            if let (Some(path), Some(hash)) = (path, hash) {
                last_writes.insert(path, hash);
            }
        }
        let checked = last_writes.len();
        for (path, attested) in &last_writes {
            let resolved = self.resolver.resolve_read(path)?;
            let on_disk = std::fs::read(&resolved.absolute).ok().map(|b| sha256_hex(&b));
            if on_disk.as_deref() != Some(attested.as_str()) {
                let err = crate::invariant::invariant_violation(
                    InvariantId::AuditChain,
                    format!("file '{}' no longer matches its attested content", path),
                );
                return Err(self.surface(err));
            }
        }

        Ok(IntegrityReport {
            audit_entries: entries.len() as u64,
            audit_head: head,
            plans_verified,
            governance_consistent: true,
            attested_writes_checked: checked,
        })
    }

    // ------------------------------------------------------------------
    // Attestation tools
    // ------------------------------------------------------------------

    fn build_evidence(&self) -> Result<EvidenceBundle, GatewayError> {
        let entries = self
            .audit_log()?
            .read_verified()
            .map_err(|e| self.surface(e))?;
        let head = entries.last().map(|e| AuditHead {
            seq: e.seq,
            entry_hash: e.entry_hash.clone(),
        });
        let mut plan_hashes: Vec<String> = self
            .plan_store()?
            .list()?
            .into_iter()
            .map(|p| p.hash)
            .collect();
        plan_hashes.sort();
        let workspace = self
            .resolver
            .root()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        Ok(EvidenceBundle {
            workspace,
            generated_at: Utc::now(),
            audit_head: head,
            audit_entry_count: entries.len() as u64,
            plan_hashes,
            governance: self.governance_store()?.load()?,
            kill_switch_engaged: self.kill_switch_engaged(),
        })
    }

    fn signer(&self) -> Result<AttestationSigner, GatewayError> {
        AttestationSigner::from_env()?.ok_or_else(|| {
            GatewayError::refusal(
                ErrorCode::AttestationDisabled,
                "no attestation secret provisioned",
            )
        })
    }

    /// `generate_attestation_bundle`.
    pub fn generate_attestation_bundle(&self) -> Result<AttestationBundle, GatewayError> {
        self.signer()?.sign(self.build_evidence()?)
    }

    /// `verify_attestation_bundle`: signature plus evidence-versus-workspace.
    pub fn verify_attestation_bundle(
        &self,
        bundle: &AttestationBundle,
    ) -> Result<(), GatewayError> {
        self.signer()?.verify(bundle)?;
        let current = self.build_evidence()?;
        let matches = bundle.evidence.audit_head == current.audit_head
            && bundle.evidence.audit_entry_count == current.audit_entry_count
            && bundle.evidence.plan_hashes == current.plan_hashes
            && bundle.evidence.governance == current.governance;
        if !matches {
            return Err(GatewayError::refusal(
                ErrorCode::AttestationEvidenceInvalid,
                "bundle evidence does not match the current workspace state",
            ));
        }
        Ok(())
    }

    /// `export_attestation_bundle`: generate and persist under the namespace.
    pub fn export_attestation_bundle(&self) -> Result<String, GatewayError> {
        let bundle = self.generate_attestation_bundle()?;
        let dir = self.resolver.attestations_dir()?;
        std::fs::create_dir_all(&dir).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot prepare attestations dir: {}", e),
            )
        })?;
        let name = format!(
            "attestation-{}.json",
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let path = dir.join(&name);
        let json = serde_json::to_string_pretty(&bundle).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("cannot serialise attestation bundle: {}", e),
            )
        })?;
        crate::plans::store::atomic_write(&path, json.as_bytes())?;
        Ok(path.display().to_string())
    }

    // ------------------------------------------------------------------
    // Recovery tools
    // ------------------------------------------------------------------

    /// `initiate_recovery` (step one of the owner protocol).
    pub fn initiate_recovery(
        &self,
        halt_report_path: &str,
        acks: RecoveryAcks,
    ) -> Result<String, GatewayError> {
        let role = self.current_role()?;
        let ks = self.kill_switch()?;
        let guard = self
            .workspace_lock()?
            .acquire(Duration::from_secs(self.config.lock_timeout_secs))?;
        let code = ks.initiate_recovery(role, halt_report_path, acks);
        drop(guard);
        code
    }

    /// `confirm_recovery` (step two): pre-flight verification must pass
    /// before the halt clears.
    pub fn confirm_recovery(
        &self,
        acks: RecoveryAcks,
        confirmation_code: &str,
    ) -> Result<(), GatewayError> {
        let role = self.current_role()?;
        let ks = self.kill_switch()?;
        let guard = self
            .workspace_lock()?
            .acquire(Duration::from_secs(self.config.lock_timeout_secs))?;
        let result = ks.confirm_recovery(role, acks, confirmation_code, || {
            self.recovery_preflight()
        });
        drop(guard);
        result?;

        let session = self.lock_session();
        let draft = AuditDraft {
            session_id: session.session_id.clone(),
            operator_id: session.operator_id.clone().unwrap_or_default(),
            role: session
                .operator_role
                .map(|r| r.as_str().to_string())
                .unwrap_or_default(),
            tool: "confirm_recovery".to_string(),
            plan_hash: None,
            phase_id: None,
            args_hash: String::new(),
            result: AuditResult::Ok,
            error_code: None,
            invariant_id: None,
            notes: "kill-switch disengaged by owner recovery".to_string(),
        };
        drop(session);
        self.audit_log()?.append(draft)?;
        Ok(())
    }

    fn recovery_preflight(&self) -> Result<(), GatewayError> {
        self.audit_log()?.verify()?;
        let plan_count = self.plan_store()?.verify_all()? as u64;
        let governance = self.governance_store()?.load()?;
        if governance.approved_plans_count != plan_count {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!(
                    "governance counts {} approved plans but the store holds {}",
                    governance.approved_plans_count, plan_count
                ),
            ));
        }
        Ok(())
    }

    pub fn operator_role(&self) -> Option<OperatorRole> {
        self.lock_session().operator_role
    }

    fn current_role(&self) -> Result<OperatorRole, GatewayError> {
        self.lock_session().operator_role.ok_or_else(|| {
            GatewayError::refusal(
                ErrorCode::SessionNotInitialized,
                "begin_session must run before recovery tools",
            )
        })
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Startup self-audit for a pre-locked workspace. On failure the caller
    /// refuses to boot and reports the failing invariant.
    pub fn startup_self_audit(&self) -> Result<(), GatewayError> {
        if !self.resolver.is_locked() {
            return Ok(());
        }
        self.verify_workspace_integrity().map_err(|err| {
            if err.is_fatal() {
                self.handle_fatal(&err, FAILURE_STARTUP);
            }
            err
        })?;
        Ok(())
    }
}
