//! Workspace root resolver and path containment proofs.
//!
//! One canonical workspace root is locked per resolver with an explicit
//! unset -> set -> frozen lifecycle; relocking with a different value is a
//! fatal invariant violation. Every path the gateway touches goes through
//! [`WorkspaceResolver::resolve_read`] / [`resolve_write`], which reject
//! traversal segments up front, normalise, chase symlinks through the
//! deepest existing ancestor, and prove the result stays under the root.
//!
//! The resolver is also the sole source of truth for the gateway's logical
//! paths (plans directory, audit log, governance file, kill-switch file,
//! lock directory). Components never derive these from the process current
//! directory; that pattern caused audit logs to land in the wrong monorepo
//! subtree in earlier gateways of this shape.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::OnceCell;

use crate::errors::{ErrorCode, GatewayError};
use crate::invariant::{invariant_violation, InvariantId};

/// Directory under the workspace root holding all gateway state.
pub const NAMESPACE_DIR: &str = ".warden";
/// Root-relative location of immutable plans.
pub const PLANS_DIR: &str = "docs/plans";
/// Root-relative location of the append-only audit log.
pub const AUDIT_LOG_FILE: &str = "audit-log.jsonl";

/// A path that has been proven to lie inside the locked workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute, symlink-resolved (through the deepest existing ancestor).
    pub absolute: PathBuf,
    /// Root-relative form with `/` separators, used in audit records and
    /// allowlist matching.
    pub relative: String,
}

#[derive(Debug, Default)]
pub struct WorkspaceResolver {
    root: OnceCell<PathBuf>,
}

impl WorkspaceResolver {
    pub fn new() -> Self {
        WorkspaceResolver {
            root: OnceCell::new(),
        }
    }

    /// Lock the workspace root. Called exactly once per lifecycle, typically
    /// by `begin_session`. Idempotent for the same resolved value; a second
    /// call with a different value violates `INV_ROOT_LOCKED_ONCE`.
    pub fn lock(&self, candidate: &Path) -> Result<PathBuf, GatewayError> {
        if !candidate.is_absolute() {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!(
                    "workspace_root must be an absolute path, got '{}'",
                    candidate.display()
                ),
            ));
        }
        let resolved = std::fs::canonicalize(candidate).map_err(|e| {
            GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!(
                    "workspace_root '{}' cannot be resolved: {}",
                    candidate.display(),
                    e
                ),
            )
        })?;
        if !resolved.is_dir() {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                format!("workspace_root '{}' is not a directory", resolved.display()),
            ));
        }
        match self.root.get() {
            None => {
                // A concurrent set of the same value is fine; set_or_get keeps
                // whichever landed first and we re-check equality below.
                let stored = self.root.get_or_init(|| resolved.clone());
                if stored != &resolved {
                    return Err(invariant_violation(
                        InvariantId::RootLockedOnce,
                        format!(
                            "workspace root already locked to '{}', refusing relock to '{}'",
                            stored.display(),
                            resolved.display()
                        ),
                    ));
                }
                tracing::info!(root = %resolved.display(), "workspace root locked");
                Ok(resolved)
            }
            Some(existing) if existing == &resolved => Ok(resolved),
            Some(existing) => Err(invariant_violation(
                InvariantId::RootLockedOnce,
                format!(
                    "workspace root already locked to '{}', refusing relock to '{}'",
                    existing.display(),
                    resolved.display()
                ),
            )),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.root.get().is_some()
    }

    pub fn root(&self) -> Result<&Path, GatewayError> {
        self.root.get().map(PathBuf::as_path).ok_or_else(|| {
            GatewayError::refusal(
                ErrorCode::SessionNotInitialized,
                "no workspace root locked; call begin_session first",
            )
        })
    }

    /// Test-harness escape hatch for the otherwise frozen lifecycle.
    pub fn reset_for_tests(&mut self) {
        self.root = OnceCell::new();
    }

    /// Prove containment of a read target.
    pub fn resolve_read(&self, target: &str) -> Result<ResolvedPath, GatewayError> {
        self.resolve(target)
    }

    /// Prove containment of a write target.
    pub fn resolve_write(&self, target: &str) -> Result<ResolvedPath, GatewayError> {
        self.resolve(target)
    }

    fn resolve(&self, target: &str) -> Result<ResolvedPath, GatewayError> {
        let root = self.root()?;
        if target.is_empty() {
            return Err(GatewayError::refusal(
                ErrorCode::InvalidInputValue,
                "path must not be empty",
            ));
        }

        // Literal `..` segments are rejected before any normalisation.
        let requested = Path::new(target);
        if requested
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(GatewayError::refusal(
                ErrorCode::PathTraversal,
                format!("path '{}' contains a parent-directory segment", target),
            ));
        }

        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            root.join(requested)
        };
        let normalized = lexical_normalize(&joined);
        let resolved = canonicalize_existing_prefix(&normalized);

        if resolved != root && !resolved.starts_with(root) {
            return Err(GatewayError::refusal(
                ErrorCode::PathOutOfWorkspace,
                format!(
                    "path '{}' resolves to '{}', outside the workspace root",
                    target,
                    resolved.display()
                ),
            ));
        }

        let relative = resolved
            .strip_prefix(root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();

        Ok(ResolvedPath {
            absolute: resolved,
            relative,
        })
    }

    // ------------------------------------------------------------------
    // Logical names: the only place these paths are constructed.
    // ------------------------------------------------------------------

    pub fn namespace_dir(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.root()?.join(NAMESPACE_DIR))
    }

    pub fn plans_dir(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.root()?.join(PLANS_DIR))
    }

    pub fn audit_log_path(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.root()?.join(AUDIT_LOG_FILE))
    }

    pub fn governance_path(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("governance.json"))
    }

    pub fn kill_switch_path(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("kill-switch.json"))
    }

    pub fn bootstrap_secret_path(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("bootstrap_secret.json"))
    }

    pub fn audit_lock_dir(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("audit.lock"))
    }

    pub fn sessions_dir(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("sessions"))
    }

    pub fn halt_reports_dir(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("halt-reports"))
    }

    pub fn attestations_dir(&self) -> Result<PathBuf, GatewayError> {
        Ok(self.namespace_dir()?.join("attestations"))
    }
}

/// Drop `.` segments without touching the filesystem. `..` never reaches
/// this point.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalise the deepest existing ancestor of `path` and re-append the
/// non-existent remainder, so symlinks in existing directories cannot smuggle
/// a target outside the root while still allowing writes to new files.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut prefix = path.to_path_buf();
    let mut rest: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if prefix.exists() {
            break;
        }
        match prefix.file_name() {
            Some(name) => {
                rest.push(name.to_os_string());
                prefix.pop();
            }
            None => break,
        }
    }
    let mut resolved = std::fs::canonicalize(&prefix).unwrap_or(prefix);
    for segment in rest.iter().rev() {
        resolved.push(segment);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn locked_resolver(dir: &Path) -> WorkspaceResolver {
        let resolver = WorkspaceResolver::new();
        resolver.lock(dir).unwrap();
        resolver
    }

    #[test]
    fn lock_is_idempotent_for_same_value() {
        let dir = tempdir().unwrap();
        let resolver = locked_resolver(dir.path());
        resolver.lock(dir.path()).unwrap();
        assert!(resolver.is_locked());
    }

    #[test]
    fn relock_with_different_root_is_fatal() {
        let dir_a = tempdir().unwrap();
        let dir_b = tempdir().unwrap();
        let resolver = locked_resolver(dir_a.path());
        let err = resolver.lock(dir_b.path()).unwrap_err();
        assert_eq!(err.invariant_id(), Some(InvariantId::RootLockedOnce));
    }

    #[test]
    fn relative_root_is_rejected() {
        let resolver = WorkspaceResolver::new();
        let err = resolver.lock(Path::new("relative/dir")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInputValue);
    }

    #[test]
    fn parent_dir_segment_is_traversal() {
        let dir = tempdir().unwrap();
        let resolver = locked_resolver(dir.path());
        let err = resolver.resolve_write("../evil.txt").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathTraversal);
        let err = resolver.resolve_write("src/../../evil.txt").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathTraversal);
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let dir = tempdir().unwrap();
        let resolver = locked_resolver(dir.path());
        let err = resolver.resolve_read("/etc/passwd").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathOutOfWorkspace);
    }

    #[test]
    fn relative_target_resolves_under_root() {
        let dir = tempdir().unwrap();
        let resolver = locked_resolver(dir.path());
        let resolved = resolver.resolve_write("src/./a.txt").unwrap();
        assert_eq!(resolved.relative, "src/a.txt");
        assert!(resolved.absolute.starts_with(resolver.root().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_detected() {
        let outside = tempdir().unwrap();
        let dir = tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        let resolver = locked_resolver(dir.path());
        let err = resolver.resolve_write("link/file.txt").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathOutOfWorkspace);
    }

    #[test]
    fn logical_paths_require_a_locked_root() {
        let resolver = WorkspaceResolver::new();
        let err = resolver.plans_dir().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SessionNotInitialized);
    }

    #[test]
    fn logical_paths_are_stable() {
        let dir = tempdir().unwrap();
        let resolver = locked_resolver(dir.path());
        let root = resolver.root().unwrap().to_path_buf();
        assert_eq!(resolver.plans_dir().unwrap(), root.join("docs/plans"));
        assert_eq!(
            resolver.audit_log_path().unwrap(),
            root.join("audit-log.jsonl")
        );
        assert_eq!(
            resolver.governance_path().unwrap(),
            root.join(".warden/governance.json")
        );
        assert_eq!(
            resolver.audit_lock_dir().unwrap(),
            root.join(".warden/audit.lock")
        );
    }
}
