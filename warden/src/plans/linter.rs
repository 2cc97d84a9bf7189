//! Plan linter.
//!
//! `lint` is a pure function over the plan bytes. It is deterministic,
//! order-independent, and returns every finding rather than stopping at the
//! first, so an approver always sees the full context.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::errors::ErrorCode;
use crate::plans::{PlanDocument, FRONT_MATTER_KEYS, MANDATORY_SECTIONS, PHASE_FIELDS};

static PHASE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("static regex"));

/// Ambiguous modal verbs: a plan written with these cannot be enforced
/// mechanically.
static MODAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(may|should|might)\b").expect("static regex"));

/// Clauses deferring to human judgement.
static JUDGMENT_PHRASES: [&str; 3] = ["best judgment", "as appropriate", "at your discretion"];

/// Stub markers have no place in an approved plan.
static STUB_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(todo|fixme|xxx|hack|mock|stub|placeholder)\b").expect("static regex")
});

/// Code-level symbols that make an objective unreadable to a non-programmer.
static CODE_SYMBOLS: [&str; 10] = ["`", " = ", "==", "->", "=>", "::", "();", "&&", "||", ";"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LintFinding {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintReport {
    pub passed: bool,
    pub errors: Vec<LintFinding>,
    pub warnings: Vec<LintFinding>,
    /// SHA-256 of the linted bytes; the plan's identity.
    pub hash: String,
}

impl LintReport {
    pub fn first_error_code(&self) -> Option<ErrorCode> {
        self.errors.first().map(|f| f.code)
    }
}

/// Lint `content`, optionally checking it against an expected identity.
pub fn lint(content: &str, expected_hash: Option<&str>) -> LintReport {
    let hash = sha256_hex(content.as_bytes());
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Some(expected) = expected_hash {
        if expected != hash {
            errors.push(LintFinding {
                code: ErrorCode::PlanHashMismatch,
                message: format!("expected hash {} but content hashes to {}", expected, hash),
            });
        }
    }

    let doc = PlanDocument::parse(content);

    lint_front_matter(&doc, &mut errors);
    lint_sections(&doc, &mut errors);
    lint_phases(&doc, &mut errors);
    lint_allowlist(&doc, &mut errors, &mut warnings);
    lint_enforceability(content, &mut errors);
    lint_auditability(&doc, &mut errors);

    if doc.verification_commands.is_empty() {
        warnings.push(LintFinding {
            code: ErrorCode::PlanMissingField,
            message: "Verification Gates declares no commands".to_string(),
        });
    }

    LintReport {
        passed: errors.is_empty(),
        errors,
        warnings,
        hash,
    }
}

fn lint_front_matter(doc: &PlanDocument, errors: &mut Vec<LintFinding>) {
    for key in FRONT_MATTER_KEYS {
        match doc.front_matter.get(key) {
            None => errors.push(LintFinding {
                code: ErrorCode::PlanMissingField,
                message: format!("front matter lacks required key '{}'", key),
            }),
            Some(value) if value.is_empty() => errors.push(LintFinding {
                code: ErrorCode::PlanMissingField,
                message: format!("front matter key '{}' is empty", key),
            }),
            Some(_) => {}
        }
    }
    if let Some(status) = doc.front_matter.get("STATUS") {
        if status != "APPROVED" {
            errors.push(LintFinding {
                code: ErrorCode::PlanMissingField,
                message: format!("front matter STATUS must be APPROVED, found '{}'", status),
            });
        }
    }
}

fn lint_sections(doc: &PlanDocument, errors: &mut Vec<LintFinding>) {
    for section in MANDATORY_SECTIONS {
        if !doc.has_section(section) {
            errors.push(LintFinding {
                code: ErrorCode::PlanMissingSection,
                message: format!("mandatory section '{}' is absent", section),
            });
        }
    }
}

fn lint_phases(doc: &PlanDocument, errors: &mut Vec<LintFinding>) {
    if doc.has_section("Phase Definitions") && doc.phases.is_empty() {
        errors.push(LintFinding {
            code: ErrorCode::PlanMissingField,
            message: "Phase Definitions contains no phases".to_string(),
        });
    }

    let mut seen_ids = BTreeSet::new();
    for (index, phase) in doc.phases.iter().enumerate() {
        let label = phase
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", index + 1));
        for field in PHASE_FIELDS {
            match phase.fields.get(field) {
                None => errors.push(LintFinding {
                    code: ErrorCode::PlanMissingField,
                    message: format!("phase {} lacks required field '{}'", label, field),
                }),
                Some(value) if value.is_empty() => errors.push(LintFinding {
                    code: ErrorCode::PlanMissingField,
                    message: format!("phase {} field '{}' is empty", label, field),
                }),
                Some(_) => {}
            }
        }
        if let Some(id) = phase.id() {
            if !PHASE_ID_RE.is_match(id) {
                errors.push(LintFinding {
                    code: ErrorCode::PlanInvalidPhaseId,
                    message: format!("phase id '{}' does not match [A-Z][A-Z0-9_]*", id),
                });
            }
            if !seen_ids.insert(id.to_string()) {
                errors.push(LintFinding {
                    code: ErrorCode::PlanInvalidPhaseId,
                    message: format!("phase id '{}' is declared more than once", id),
                });
            }
        }
    }
}

fn lint_allowlist(
    doc: &PlanDocument,
    errors: &mut Vec<LintFinding>,
    warnings: &mut Vec<LintFinding>,
) {
    if doc.has_section("Path Allowlist") && doc.allowlist.is_empty() {
        warnings.push(LintFinding {
            code: ErrorCode::PlanInvalidPath,
            message: "Path Allowlist is empty; no write can match it".to_string(),
        });
    }
    for entry in &doc.allowlist {
        if Path::new(entry).is_absolute() {
            errors.push(LintFinding {
                code: ErrorCode::PlanInvalidPath,
                message: format!("allowlist entry '{}' is absolute", entry),
            });
        }
        if entry.split(['/', '\\']).any(|seg| seg == "..") {
            errors.push(LintFinding {
                code: ErrorCode::PlanPathEscape,
                message: format!("allowlist entry '{}' contains '..'", entry),
            });
        }
    }
}

fn lint_enforceability(content: &str, errors: &mut Vec<LintFinding>) {
    for (number, line) in content.lines().enumerate() {
        if let Some(m) = MODAL_RE.find(line) {
            errors.push(LintFinding {
                code: ErrorCode::PlanNotEnforceable,
                message: format!(
                    "line {}: ambiguous modal verb '{}'",
                    number + 1,
                    m.as_str()
                ),
            });
        }
        let lower = line.to_lowercase();
        for phrase in JUDGMENT_PHRASES {
            if lower.contains(phrase) {
                errors.push(LintFinding {
                    code: ErrorCode::PlanNotEnforceable,
                    message: format!("line {}: human-judgment clause '{}'", number + 1, phrase),
                });
            }
        }
        if let Some(m) = STUB_MARKER_RE.find(line) {
            errors.push(LintFinding {
                code: ErrorCode::PlanNotEnforceable,
                message: format!("line {}: stub marker '{}'", number + 1, m.as_str()),
            });
        }
    }
}

fn lint_auditability(doc: &PlanDocument, errors: &mut Vec<LintFinding>) {
    for phase in &doc.phases {
        let label = phase.id().unwrap_or(&phase.heading);
        if let Some(objective) = phase.objective() {
            for symbol in CODE_SYMBOLS {
                if objective.contains(symbol) {
                    errors.push(LintFinding {
                        code: ErrorCode::PlanNotAuditable,
                        message: format!(
                            "phase {}: objective contains code-level symbol '{}'",
                            label,
                            symbol.trim()
                        ),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::test_fixtures::approved_plan;

    fn codes(report: &LintReport) -> Vec<ErrorCode> {
        report.errors.iter().map(|f| f.code).collect()
    }

    #[test]
    fn approved_fixture_lints_clean() {
        let content = approved_plan(&["src/"], &["true"]);
        let report = lint(&content, None);
        assert!(report.passed, "unexpected findings: {:?}", report.errors);
        assert_eq!(report.hash, sha256_hex(content.as_bytes()));
    }

    #[test]
    fn expected_hash_mismatch_is_reported() {
        let content = approved_plan(&["src/"], &["true"]);
        let report = lint(&content, Some(&"0".repeat(64)));
        assert!(codes(&report).contains(&ErrorCode::PlanHashMismatch));
    }

    #[test]
    fn missing_section_is_reported_per_section() {
        let report = lint("no structure at all", None);
        let missing = codes(&report)
            .iter()
            .filter(|c| **c == ErrorCode::PlanMissingSection)
            .count();
        assert_eq!(missing, MANDATORY_SECTIONS.len());
    }

    #[test]
    fn bad_and_duplicate_phase_ids_are_reported() {
        let mut content = approved_plan(&["src/"], &["true"]);
        content = content.replace(
            "### Phase ONE\n- Phase ID: ONE",
            "### Phase one\n- Phase ID: one",
        );
        let report = lint(&content, None);
        assert!(codes(&report).contains(&ErrorCode::PlanInvalidPhaseId));

        let mut duplicated = approved_plan(&["src/"], &["true"]);
        let phase_block = "### Phase ONE\n- Phase ID: ONE";
        duplicated = duplicated.replace(
            phase_block,
            &format!("{0}\n- Objective: Repeat the first phase goal.\n- Allowed operations: none beyond the allowlist\n- Forbidden operations: everything else\n- Required intent artifacts: rationale\n- Verification commands: true\n- Expected outcomes: identical\n- Failure stop conditions: non-zero exit\n\n{0}", phase_block),
        );
        let report = lint(&duplicated, None);
        assert!(codes(&report).contains(&ErrorCode::PlanInvalidPhaseId));
    }

    #[test]
    fn absolute_and_escaping_allowlist_entries_are_reported() {
        let content = approved_plan(&["/etc", "src/../secrets"], &["true"]);
        let report = lint(&content, None);
        let found = codes(&report);
        assert!(found.contains(&ErrorCode::PlanInvalidPath));
        assert!(found.contains(&ErrorCode::PlanPathEscape));
    }

    #[test]
    fn modal_verbs_and_stub_markers_break_enforceability() {
        let mut content = approved_plan(&["src/"], &["true"]);
        content.push_str("\n## Notes\n- the executor should use mock data where needed\n");
        let report = lint(&content, None);
        let enforce = report
            .errors
            .iter()
            .filter(|f| f.code == ErrorCode::PlanNotEnforceable)
            .count();
        assert!(enforce >= 2, "expected modal and stub findings: {:?}", report.errors);
    }

    #[test]
    fn code_symbols_in_objective_break_auditability() {
        let content = approved_plan(&["src/"], &["true"]).replace(
            "- Objective: Write the approved demonstration files.",
            "- Objective: Set `cfg.level = 3` before the run.",
        );
        let report = lint(&content, None);
        assert!(codes(&report).contains(&ErrorCode::PlanNotAuditable));
    }

    #[test]
    fn linting_is_deterministic() {
        let content = approved_plan(&["src/"], &["true"]).replace(
            "- Forbidden operations: deleting existing tests",
            "- Forbidden operations: the executor might improvise",
        );
        let a = lint(&content, None);
        let b = lint(&content, None);
        assert_eq!(a.errors, b.errors);
        assert_eq!(a.hash, b.hash);
    }
}
