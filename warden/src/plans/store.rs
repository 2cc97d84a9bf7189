//! Hash-addressed plan store.
//!
//! Each plan lives at `<plans_dir>/<sha256>.md` and is never mutated; its
//! identity is the hash of the exact bytes on disk. Reads recompute the hash
//! and any divergence from the filename is a fatal `INV_PLAN_IMMUTABLE`
//! violation.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::errors::{ErrorCode, GatewayError};
use crate::invariant::{invariant_violation, InvariantId};
use crate::plans::linter::{lint, LintReport};
use crate::plans::{is_plan_hash, PlanDocument};

#[derive(Debug, Clone)]
pub struct PlanStore {
    dir: PathBuf,
}

/// One plan as seen by `list`: identity, extracted metadata, and the lint
/// report. Invalid plans are reported with their findings, never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub hash: String,
    pub status: Option<String>,
    pub scope: Option<String>,
    pub purpose: Option<String>,
    pub created: Option<String>,
    pub phase_ids: Vec<String>,
    pub lint: LintReport,
}

impl PlanStore {
    pub fn new(dir: PathBuf) -> Self {
        PlanStore { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.md", hash))
    }

    /// Store `content` under its own hash. Atomic (temp + fsync + rename);
    /// idempotent for identical bytes; an existing file with different bytes
    /// means a hash collision or a concurrent writer and is refused.
    pub fn put(&self, content: &str) -> Result<String, GatewayError> {
        let hash = sha256_hex(content.as_bytes());
        let path = self.path_for(&hash);

        if path.exists() {
            let existing = fs::read(&path).map_err(|e| {
                GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("failed to read existing plan {}: {}", path.display(), e),
                )
            })?;
            if existing == content.as_bytes() {
                return Ok(hash);
            }
            return Err(GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!(
                    "plan file {} already exists with different content",
                    path.display()
                ),
            ));
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::FileWriteFailed,
                format!("failed to create plans dir {}: {}", self.dir.display(), e),
            )
        })?;
        atomic_write(&path, content.as_bytes())?;
        tracing::info!(plan = %hash, "plan stored");
        Ok(hash)
    }

    /// Read a plan and prove it still matches its identity.
    pub fn get(&self, hash: &str) -> Result<String, GatewayError> {
        if !is_plan_hash(hash) {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputFormat,
                format!("'{}' is not a plan hash (64 lowercase hex chars)", hash),
            ));
        }
        let path = self.path_for(hash);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::refusal(
                    ErrorCode::PlanNotFound,
                    format!("no plan stored under hash {}", hash),
                )
                .with_plan(hash));
            }
            Err(e) => {
                return Err(GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("failed to read plan {}: {}", path.display(), e),
                ));
            }
        };
        let actual = sha256_hex(content.as_bytes());
        if actual != hash {
            return Err(invariant_violation(
                InvariantId::PlanImmutable,
                format!(
                    "plan file {} hashes to {}, diverging from its name",
                    path.display(),
                    actual
                ),
            ));
        }
        Ok(content)
    }

    pub fn exists(&self, hash: &str) -> bool {
        is_plan_hash(hash) && self.path_for(hash).exists()
    }

    /// Enumerate every `*.md` plan, verifying each against its filename.
    pub fn list(&self) -> Result<Vec<PlanSummary>, GatewayError> {
        let mut summaries = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => {
                return Err(GatewayError::refusal(
                    ErrorCode::FileReadFailed,
                    format!("failed to list plans dir {}: {}", self.dir.display(), e),
                ));
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("md") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .filter(|stem| is_plan_hash(stem))
            .collect();
        names.sort();

        for hash in names {
            let content = self.get(&hash)?;
            let doc = PlanDocument::parse(&content);
            let report = lint(&content, Some(&hash));
            summaries.push(PlanSummary {
                hash,
                status: doc.front_matter.get("STATUS").cloned(),
                scope: doc.front_matter.get("SCOPE").cloned(),
                purpose: doc.front_matter.get("PURPOSE").cloned(),
                created: doc.front_matter.get("CREATED").cloned(),
                phase_ids: doc
                    .phases
                    .iter()
                    .filter_map(|p| p.id().map(str::to_string))
                    .collect(),
                lint: report,
            });
        }
        Ok(summaries)
    }

    /// Re-verify every stored plan; first divergence raises the fatal error.
    pub fn verify_all(&self) -> Result<usize, GatewayError> {
        Ok(self.list()?.len())
    }
}

/// Temp file in the target directory, fsync, rename, then sync the directory
/// entry where the platform supports it.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), GatewayError> {
    let dir = path.parent().ok_or_else(|| {
        GatewayError::refusal(
            ErrorCode::FileWriteFailed,
            format!("path {} has no parent directory", path.display()),
        )
    })?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        if let Ok(dir_file) = fs::File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(|e| {
        GatewayError::refusal(
            ErrorCode::FileWriteFailed,
            format!("atomic write to {} failed: {}", path.display(), e),
        )
    })
}
