//! Plan documents.
//!
//! A plan is an immutable Markdown value whose identity is the SHA-256 of its
//! bytes. This module holds the lenient structural parser shared by the
//! linter, the write gate, and the replay engine; pass/fail judgement lives
//! entirely in [`linter`].

pub mod linter;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};

/// The seven mandatory body sections, in canonical order.
pub const MANDATORY_SECTIONS: [&str; 7] = [
    "Plan Metadata",
    "Scope & Constraints",
    "Phase Definitions",
    "Path Allowlist",
    "Verification Gates",
    "Forbidden Actions",
    "Rollback / Failure Policy",
];

/// The eight required fields of every phase.
pub const PHASE_FIELDS: [&str; 8] = [
    "Phase ID",
    "Objective",
    "Allowed operations",
    "Forbidden operations",
    "Required intent artifacts",
    "Verification commands",
    "Expected outcomes",
    "Failure stop conditions",
];

/// Front-matter keys every plan must carry.
pub const FRONT_MATTER_KEYS: [&str; 5] = ["STATUS", "SCOPE", "VERSION", "CREATED", "PURPOSE"];

/// True iff `s` is a well-formed plan identity (64 lowercase hex chars).
pub fn is_plan_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// One phase inside *Phase Definitions*.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanPhase {
    /// The `###` heading line introducing the phase.
    pub heading: String,
    /// Field name -> value, as written.
    pub fields: BTreeMap<String, String>,
}

impl PlanPhase {
    pub fn id(&self) -> Option<&str> {
        self.fields.get("Phase ID").map(String::as_str)
    }

    pub fn objective(&self) -> Option<&str> {
        self.fields.get("Objective").map(String::as_str)
    }

    pub fn verification_commands(&self) -> Vec<String> {
        self.fields
            .get("Verification commands")
            .map(|v| {
                v.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parsed view of a plan. Parsing is lenient: missing pieces are simply
/// absent here, and the linter reports them.
#[derive(Debug, Clone, Default)]
pub struct PlanDocument {
    pub front_matter: BTreeMap<String, String>,
    /// Section title -> body, in document order.
    pub sections: Vec<(String, String)>,
    pub phases: Vec<PlanPhase>,
    /// Entries of *Path Allowlist*, root-relative paths or globs.
    pub allowlist: Vec<String>,
    /// Commands of *Verification Gates*, run after every gated write.
    pub verification_commands: Vec<String>,
    /// Policy allow-set tags declared in *Scope & Constraints*.
    pub allow_tags: BTreeSet<String>,
}

impl PlanDocument {
    pub fn parse(content: &str) -> PlanDocument {
        let mut doc = PlanDocument::default();
        let mut lines = content.lines().peekable();

        // Front matter: a leading `---` fence pair of `KEY: value` lines.
        while matches!(lines.peek(), Some(l) if l.trim().is_empty()) {
            lines.next();
        }
        if matches!(lines.peek(), Some(l) if l.trim() == "---") {
            lines.next();
            for line in lines.by_ref() {
                let line = line.trim();
                if line == "---" {
                    break;
                }
                if let Some((key, value)) = line.split_once(':') {
                    doc.front_matter
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }

        let mut current_section: Option<(String, String)> = None;
        let mut current_phase: Option<PlanPhase> = None;

        for line in lines {
            let trimmed = line.trim();
            if let Some(title) = trimmed.strip_prefix("## ") {
                if let Some(phase) = current_phase.take() {
                    doc.phases.push(phase);
                }
                if let Some(section) = current_section.take() {
                    doc.sections.push(section);
                }
                current_section = Some((title.trim().to_string(), String::new()));
                continue;
            }

            let in_phase_definitions = current_section
                .as_ref()
                .map(|(t, _)| t == "Phase Definitions")
                .unwrap_or(false);

            if in_phase_definitions {
                if let Some(heading) = trimmed.strip_prefix("### ") {
                    if let Some(phase) = current_phase.take() {
                        doc.phases.push(phase);
                    }
                    current_phase = Some(PlanPhase {
                        heading: heading.trim().to_string(),
                        fields: BTreeMap::new(),
                    });
                } else if let Some(phase) = current_phase.as_mut() {
                    if let Some(item) = trimmed.strip_prefix("- ") {
                        if let Some((name, value)) = item.split_once(':') {
                            phase
                                .fields
                                .insert(name.trim().to_string(), value.trim().to_string());
                        }
                    }
                }
            }

            if let Some((_, body)) = current_section.as_mut() {
                body.push_str(line);
                body.push('\n');
            }
        }
        if let Some(phase) = current_phase.take() {
            doc.phases.push(phase);
        }
        if let Some(section) = current_section.take() {
            doc.sections.push(section);
        }

        doc.allowlist = doc.list_items("Path Allowlist");
        doc.verification_commands = doc.list_items("Verification Gates");
        doc.allow_tags = doc
            .list_items("Scope & Constraints")
            .into_iter()
            .filter_map(|item| {
                item.strip_prefix("allow:")
                    .map(|tag| tag.trim().to_string())
            })
            .collect();
        doc
    }

    pub fn section(&self, title: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, body)| body.as_str())
    }

    pub fn has_section(&self, title: &str) -> bool {
        self.section(title).is_some()
    }

    pub fn phase(&self, id: &str) -> Option<&PlanPhase> {
        self.phases.iter().find(|p| p.id() == Some(id))
    }

    fn list_items(&self, title: &str) -> Vec<String> {
        self.section(title)
            .map(|body| {
                body.lines()
                    .filter_map(|l| l.trim().strip_prefix("- "))
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    /// A plan that lints clean. Kept here so the linter, store, gate, and
    /// integration suites all exercise the same document.
    pub fn approved_plan(allowlist: &[&str], verification: &[&str]) -> String {
        let allow_items: String = allowlist
            .iter()
            .map(|e| format!("- {}\n", e))
            .collect();
        let verify_items: String = verification
            .iter()
            .map(|e| format!("- {}\n", e))
            .collect();
        format!(
            "---\n\
             STATUS: APPROVED\n\
             SCOPE: gateway-managed source edits\n\
             VERSION: 1\n\
             CREATED: 2026-07-01\n\
             PURPOSE: demonstration of a fully approved change\n\
             ---\n\
             \n\
             ## Plan Metadata\n\
             - Author: operations\n\
             - Review: recorded in the approval record\n\
             \n\
             ## Scope & Constraints\n\
             - every write is limited to the path allowlist below\n\
             \n\
             ## Phase Definitions\n\
             \n\
             ### Phase ONE\n\
             - Phase ID: ONE\n\
             - Objective: Write the approved demonstration files.\n\
             - Allowed operations: create and edit files inside the allowlist\n\
             - Forbidden operations: deleting existing tests\n\
             - Required intent artifacts: a written rationale for every file\n\
             - Verification commands: true\n\
             - Expected outcomes: the demonstration files exist with approved content\n\
             - Failure stop conditions: any verification command exits non-zero\n\
             \n\
             ## Path Allowlist\n\
             {allow_items}\
             \n\
             ## Verification Gates\n\
             {verify_items}\
             \n\
             ## Forbidden Actions\n\
             - writing outside the allowlist\n\
             - weakening verification gates\n\
             \n\
             ## Rollback / Failure Policy\n\
             - restore the prior bytes and halt the phase\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_front_matter_sections_and_phases() {
        let content = test_fixtures::approved_plan(&["src/"], &["true"]);
        let doc = PlanDocument::parse(&content);
        assert_eq!(doc.front_matter.get("STATUS").unwrap(), "APPROVED");
        for section in MANDATORY_SECTIONS {
            assert!(doc.has_section(section), "missing section {}", section);
        }
        assert_eq!(doc.phases.len(), 1);
        let phase = &doc.phases[0];
        assert_eq!(phase.id(), Some("ONE"));
        for field in PHASE_FIELDS {
            assert!(phase.fields.contains_key(field), "missing field {}", field);
        }
        assert_eq!(doc.allowlist, vec!["src/"]);
        assert_eq!(doc.verification_commands, vec!["true"]);
    }

    #[test]
    fn allow_tags_come_from_scope_section() {
        let content = "## Scope & Constraints\n- allow: rust-unwrap\n- plain constraint\n";
        let doc = PlanDocument::parse(content);
        assert!(doc.allow_tags.contains("rust-unwrap"));
        assert_eq!(doc.allow_tags.len(), 1);
    }

    #[test]
    fn hash_shape_check() {
        assert!(is_plan_hash(&"a1".repeat(32)));
        assert!(!is_plan_hash("0"));
        assert!(!is_plan_hash(&"A1".repeat(32)));
    }

    #[test]
    fn missing_front_matter_is_tolerated_by_the_parser() {
        let doc = PlanDocument::parse("## Plan Metadata\nbody\n");
        assert!(doc.front_matter.is_empty());
        assert!(doc.has_section("Plan Metadata"));
    }
}
