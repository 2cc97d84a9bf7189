//! Attestation bundles.
//!
//! A bundle is a canonicalised evidence summary of the workspace's audit
//! state signed with HMAC-SHA256 under the attestation secret. Verification
//! recomputes the signature over the embedded evidence; callers additionally
//! compare the evidence against current state. Export writes the bundle
//! under the namespace directory; presentation beyond that JSON is a
//! collaborator concern.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::audit::log::AuditHead;
use crate::canonical::canonical_json;
use crate::errors::{ErrorCode, GatewayError};
use crate::governance::GovernanceState;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable carrying the base64 attestation secret.
pub const ATTESTATION_SECRET_ENV: &str = "WARDEN_ATTESTATION_SECRET";

pub const ATTESTATION_ALGORITHM: &str = "HMAC-SHA256";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// Workspace identity in root-relative terms (the root's final path
    /// component), never an absolute host path.
    pub workspace: String,
    pub generated_at: DateTime<Utc>,
    pub audit_head: Option<AuditHead>,
    pub audit_entry_count: u64,
    pub plan_hashes: Vec<String>,
    pub governance: GovernanceState,
    pub kill_switch_engaged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationBundle {
    pub algorithm: String,
    pub evidence: EvidenceBundle,
    /// Lowercase hex HMAC over the canonical JSON of `evidence`.
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct AttestationSigner {
    secret: Vec<u8>,
}

impl AttestationSigner {
    pub fn new(secret: Vec<u8>) -> Self {
        AttestationSigner { secret }
    }

    /// Build a signer from the environment. `None` disables attestation
    /// without affecting the rest of the gateway.
    pub fn from_env() -> Result<Option<Self>, GatewayError> {
        match std::env::var(ATTESTATION_SECRET_ENV) {
            Ok(raw) if !raw.trim().is_empty() => {
                let secret = base64::engine::general_purpose::STANDARD
                    .decode(raw.trim())
                    .map_err(|e| {
                        GatewayError::refusal(
                            ErrorCode::InvalidInputFormat,
                            format!("{} is not valid base64: {}", ATTESTATION_SECRET_ENV, e),
                        )
                    })?;
                Ok(Some(AttestationSigner::new(secret)))
            }
            _ => Ok(None),
        }
    }

    fn evidence_mac(&self, evidence: &EvidenceBundle) -> Result<String, GatewayError> {
        let value = serde_json::to_value(evidence).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::AttestationEvidenceInvalid,
                format!("evidence does not serialise: {}", e),
            )
        })?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::AttestationDisabled,
                format!("attestation secret unusable: {}", e),
            )
        })?;
        mac.update(canonical_json(&value).as_bytes());
        let bytes = mac.finalize().into_bytes();
        Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn sign(&self, evidence: EvidenceBundle) -> Result<AttestationBundle, GatewayError> {
        let signature = self.evidence_mac(&evidence)?;
        Ok(AttestationBundle {
            algorithm: ATTESTATION_ALGORITHM.to_string(),
            evidence,
            signature,
        })
    }

    /// Check the signature over the embedded evidence.
    pub fn verify(&self, bundle: &AttestationBundle) -> Result<(), GatewayError> {
        if bundle.algorithm != ATTESTATION_ALGORITHM {
            return Err(GatewayError::refusal(
                ErrorCode::AttestationEvidenceInvalid,
                format!("unsupported attestation algorithm '{}'", bundle.algorithm),
            ));
        }
        let expected = self.evidence_mac(&bundle.evidence)?;
        if expected != bundle.signature {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidSignature,
                "attestation signature does not match evidence",
            ));
        }
        Ok(())
    }
}
