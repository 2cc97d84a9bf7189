//! Static policy engine.
//!
//! Evaluates a proposed write against the plan that authorises it. Stages run
//! in a fixed order and the first failing stage aborts the pipeline:
//!
//! 1. syntactic stub check (shape scan per extension)
//! 2. textual forbidden-pattern scan (registry rows, per-plan allow-sets)
//! 3. diff-level comment-out detection
//! 4. path-scope check against the plan allowlist
//! 5. role-contract check for code-bearing paths
//!
//! The engine never touches the filesystem; it sees proposed bytes, prior
//! bytes, and the parsed plan.

pub mod registry;
pub mod stub;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::errors::{ErrorCode, GatewayError};
use crate::plans::PlanDocument;
use crate::policy::registry::{
    comment_style, line_of_offset, mask, mask_rust_test_regions, rules_for, CommentStyle,
    PatternContext,
};
use crate::policy::stub::scan_stub_shapes;

/// Extensions whose files count as code for the role-contract stage.
const CODE_BEARING_EXTENSIONS: [&str; 13] = [
    "rs", "js", "jsx", "ts", "tsx", "py", "go", "java", "c", "h", "cpp", "hpp", "sh",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStage {
    StubShape,
    ForbiddenPattern,
    CommentOut,
    PathScope,
    RoleContract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub stage: PolicyStage,
    pub code: ErrorCode,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub violations: Vec<PolicyViolation>,
}

impl PolicyVerdict {
    fn allow() -> Self {
        PolicyVerdict {
            allowed: true,
            violations: Vec::new(),
        }
    }

    fn deny(violations: Vec<PolicyViolation>) -> Self {
        PolicyVerdict {
            allowed: false,
            violations,
        }
    }

    pub fn first(&self) -> Option<&PolicyViolation> {
        self.violations.first()
    }
}

/// Everything one evaluation sees.
#[derive(Debug)]
pub struct PolicyInput<'a> {
    /// Root-relative path with `/` separators, as proven by the resolver.
    pub relative_path: &'a str,
    pub proposed: &'a str,
    pub prior: Option<&'a str>,
    pub plan: &'a PlanDocument,
    /// Content role declared by the caller (for example `EXECUTABLE`).
    pub declared_role: &'a str,
    /// Metadata fields declared alongside the write.
    pub declared_fields: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    role_contracts: BTreeMap<String, Vec<String>>,
    deadline: Duration,
}

impl PolicyEngine {
    pub fn new(config: &GatewayConfig) -> Self {
        PolicyEngine {
            role_contracts: config.role_contracts.clone(),
            deadline: Duration::from_secs(config.policy_deadline_secs),
        }
    }

    /// Run the staged pipeline. The soft deadline turns an overrunning
    /// evaluation into a hard failure.
    pub fn evaluate(&self, input: &PolicyInput<'_>) -> Result<PolicyVerdict, GatewayError> {
        let started = Instant::now();
        let extension = extension_of(input.relative_path);

        let stages: [fn(&PolicyEngine, &PolicyInput<'_>, &str) -> Vec<PolicyViolation>; 5] = [
            Self::check_stub_shapes,
            Self::check_forbidden_patterns,
            Self::check_comment_out,
            Self::check_path_scope,
            Self::check_role_contract,
        ];
        for stage in stages {
            if started.elapsed() > self.deadline {
                return Err(GatewayError::refusal(
                    ErrorCode::PolicyViolation,
                    format!(
                        "policy evaluation exceeded its {}s deadline",
                        self.deadline.as_secs()
                    ),
                ));
            }
            let violations = stage(self, input, &extension);
            if !violations.is_empty() {
                return Ok(PolicyVerdict::deny(violations));
            }
        }
        Ok(PolicyVerdict::allow())
    }

    fn check_stub_shapes(
        &self,
        input: &PolicyInput<'_>,
        extension: &str,
    ) -> Vec<PolicyViolation> {
        scan_stub_shapes(extension, input.proposed)
            .into_iter()
            .map(|finding| PolicyViolation {
                stage: PolicyStage::StubShape,
                code: ErrorCode::PolicyViolation,
                reason: finding.reason,
                line: Some(finding.line),
            })
            .collect()
    }

    fn check_forbidden_patterns(
        &self,
        input: &PolicyInput<'_>,
        extension: &str,
    ) -> Vec<PolicyViolation> {
        let style = comment_style(extension);
        let allow_tags: &BTreeSet<String> = &input.plan.allow_tags;
        let mut violations = Vec::new();

        // Masked views are shared across rows with the same context.
        let non_comment = mask(input.proposed, style, false);
        let code_only = mask(input.proposed, style, true);
        let outside_tests = if extension == "rs" {
            mask_rust_test_regions(&code_only)
        } else {
            code_only.clone()
        };

        for compiled in rules_for(extension) {
            if allow_tags.contains(compiled.rule.allow_tag) {
                continue;
            }
            let haystack = match compiled.rule.context {
                PatternContext::NonComment => &non_comment,
                PatternContext::CodeOnly => &code_only,
                PatternContext::CodeOutsideTests => &outside_tests,
            };
            for m in compiled.regex.find_iter(haystack) {
                violations.push(PolicyViolation {
                    stage: PolicyStage::ForbiddenPattern,
                    code: ErrorCode::PolicyViolation,
                    reason: format!("{} ('{}')", compiled.rule.reason, m.as_str().trim()),
                    line: Some(line_of_offset(haystack, m.start())),
                });
            }
        }
        violations.sort_by_key(|v| v.line);
        violations
    }

    fn check_comment_out(&self, input: &PolicyInput<'_>, extension: &str) -> Vec<PolicyViolation> {
        let Some(prior) = input.prior else {
            return Vec::new();
        };
        let style = comment_style(extension);
        if style == CommentStyle::Plain {
            return Vec::new();
        }

        let prior_code: BTreeSet<&str> = prior
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !is_comment_line(l, style))
            .filter(|l| l.chars().any(char::is_alphanumeric))
            .collect();

        let mut violations = Vec::new();
        for (number, line) in input.proposed.lines().enumerate() {
            let trimmed = line.trim();
            if !is_comment_line(trimmed, style) {
                continue;
            }
            let payload = strip_comment_prefix(trimmed, style);
            if !payload.is_empty() && prior_code.contains(payload) {
                violations.push(PolicyViolation {
                    stage: PolicyStage::CommentOut,
                    code: ErrorCode::CommentOutDetected,
                    reason: format!("prior code line commented out: '{}'", payload),
                    line: Some(number + 1),
                });
            }
        }
        violations
    }

    fn check_path_scope(&self, input: &PolicyInput<'_>, _extension: &str) -> Vec<PolicyViolation> {
        let Ok(matcher) = allowlist_matcher(&input.plan.allowlist) else {
            return vec![PolicyViolation {
                stage: PolicyStage::PathScope,
                code: ErrorCode::PolicyViolation,
                reason: "plan allowlist contains an uncompilable glob".to_string(),
                line: None,
            }];
        };
        if matcher.is_match(input.relative_path) {
            Vec::new()
        } else {
            vec![PolicyViolation {
                stage: PolicyStage::PathScope,
                code: ErrorCode::PolicyViolation,
                reason: format!(
                    "path '{}' matches no entry of the plan allowlist",
                    input.relative_path
                ),
                line: None,
            }]
        }
    }

    fn check_role_contract(
        &self,
        input: &PolicyInput<'_>,
        extension: &str,
    ) -> Vec<PolicyViolation> {
        if !CODE_BEARING_EXTENSIONS.contains(&extension) {
            return Vec::new();
        }
        let Some(required) = self.role_contracts.get(input.declared_role) else {
            return vec![PolicyViolation {
                stage: PolicyStage::RoleContract,
                code: ErrorCode::RoleContractViolation,
                reason: format!("unknown content role '{}'", input.declared_role),
                line: None,
            }];
        };
        required
            .iter()
            .filter(|field| {
                input
                    .declared_fields
                    .get(*field)
                    .map(|v| v.trim().is_empty())
                    .unwrap_or(true)
            })
            .map(|field| PolicyViolation {
                stage: PolicyStage::RoleContract,
                code: ErrorCode::RoleContractViolation,
                reason: format!(
                    "role '{}' requires declared field '{}'",
                    input.declared_role, field
                ),
                line: None,
            })
            .collect()
    }
}

/// Compile the plan allowlist into a glob matcher. A trailing `/` (or a bare
/// directory name without glob metacharacters) covers the whole subtree.
pub fn allowlist_matcher(entries: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for entry in entries {
        let normalized = entry.trim_end_matches('/');
        if entry.ends_with('/') || !entry.contains(['*', '?', '[', '{']) {
            builder.add(Glob::new(&format!("{}/**", normalized))?);
        }
        if !normalized.is_empty() {
            builder.add(Glob::new(normalized)?);
        }
    }
    builder.build()
}

fn extension_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_comment_line(trimmed: &str, style: CommentStyle) -> bool {
    match style {
        CommentStyle::CLike => {
            trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
        }
        CommentStyle::Python => trimmed.starts_with('#'),
        CommentStyle::Plain => false,
    }
}

fn strip_comment_prefix(trimmed: &str, style: CommentStyle) -> &str {
    let stripped = match style {
        CommentStyle::CLike => trimmed
            .trim_start_matches('/')
            .trim_start_matches('*')
            .trim_end_matches("*/"),
        CommentStyle::Python => trimmed.trim_start_matches('#'),
        CommentStyle::Plain => trimmed,
    };
    stripped.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::test_fixtures::approved_plan;

    fn plan_with(allowlist: &[&str]) -> PlanDocument {
        PlanDocument::parse(&approved_plan(allowlist, &["true"]))
    }

    fn executable_fields() -> BTreeMap<String, String> {
        [
            ("purpose", "demo"),
            ("connected_via", "cli"),
            ("failure_modes", "none"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(&GatewayConfig::default())
    }

    fn input<'a>(
        plan: &'a PlanDocument,
        fields: &'a BTreeMap<String, String>,
        path: &'a str,
        proposed: &'a str,
        prior: Option<&'a str>,
    ) -> PolicyInput<'a> {
        PolicyInput {
            relative_path: path,
            proposed,
            prior,
            plan,
            declared_role: "EXECUTABLE",
            declared_fields: fields,
        }
    }

    #[test]
    fn clean_text_write_is_allowed() {
        let plan = plan_with(&["src/"]);
        let fields = executable_fields();
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/a.txt", "hello\n", None))
            .unwrap();
        assert!(verdict.allowed);
    }

    #[test]
    fn empty_function_body_is_denied_at_stage_one() {
        let plan = plan_with(&["src/"]);
        let fields = executable_fields();
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/x.js", "function f(){}", None))
            .unwrap();
        assert!(!verdict.allowed);
        let first = verdict.first().unwrap();
        assert_eq!(first.stage, PolicyStage::StubShape);
        assert_eq!(first.reason, "empty function body");
    }

    #[test]
    fn rust_unwrap_is_denied_outside_tests_only() {
        let plan = plan_with(&["src/"]);
        let fields = executable_fields();
        let bad = "pub fn load() -> Result<(), Error> { let v = read().unwrap(); Ok(v) }\n";
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/lib.rs", bad, None))
            .unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.first().unwrap().stage, PolicyStage::ForbiddenPattern);

        let test_gated = "fn real() -> usize { 1 }\n#[cfg(test)]\nmod tests {\n    #[test]\n    fn t() { assert_eq!(super::real(), helper().unwrap()); }\n    fn helper() -> Result<usize, ()> { Ok(1) }\n}\n";
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/lib.rs", test_gated, None))
            .unwrap();
        assert!(verdict.allowed, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn plan_allow_tag_whitelists_a_rule() {
        let content = approved_plan(&["src/"], &["true"]).replace(
            "- every write is limited to the path allowlist below",
            "- every write is limited to the path allowlist below\n- allow: rust-unwrap",
        );
        let plan = PlanDocument::parse(&content);
        let fields = executable_fields();
        let allowed = "pub fn load() -> usize { read().unwrap() }\n";
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/lib.rs", allowed, None))
            .unwrap();
        assert!(verdict.allowed, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn stub_marker_in_comment_is_tolerated() {
        let plan = plan_with(&["src/"]);
        let fields = executable_fields();
        let content = "// TODO revisit the retry ceiling\nexport const LIMIT = 3;\n";
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/limits.ts", content, None))
            .unwrap();
        assert!(verdict.allowed, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn commenting_out_prior_code_is_denied() {
        let plan = plan_with(&["src/"]);
        let fields = executable_fields();
        let prior = "const limit = 10;\nrun(limit);\n";
        let proposed = "const limit = 10;\n// run(limit);\n";
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "src/app.js", proposed, Some(prior)))
            .unwrap();
        assert!(!verdict.allowed);
        let first = verdict.first().unwrap();
        assert_eq!(first.code, ErrorCode::CommentOutDetected);
        assert_eq!(first.line, Some(2));
    }

    #[test]
    fn path_outside_allowlist_is_denied() {
        let plan = plan_with(&["src/"]);
        let fields = executable_fields();
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "docs/readme.txt", "x\n", None))
            .unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.first().unwrap().stage, PolicyStage::PathScope);
    }

    #[test]
    fn glob_allowlist_entries_match() {
        let plan = plan_with(&["src/**/*.rs"]);
        let fields = executable_fields();
        let verdict = engine()
            .evaluate(&input(
                &plan,
                &fields,
                "src/deep/mod.rs",
                "pub fn f() -> usize { 1 }\n",
                None,
            ))
            .unwrap();
        assert!(verdict.allowed, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn missing_role_contract_fields_are_denied() {
        let plan = plan_with(&["src/"]);
        let mut fields = executable_fields();
        fields.remove("failure_modes");
        let verdict = engine()
            .evaluate(&input(
                &plan,
                &fields,
                "src/app.js",
                "export const x = 1;\n",
                None,
            ))
            .unwrap();
        assert!(!verdict.allowed);
        let first = verdict.first().unwrap();
        assert_eq!(first.code, ErrorCode::RoleContractViolation);
        assert!(first.reason.contains("failure_modes"));
    }

    #[test]
    fn non_code_paths_skip_the_role_contract() {
        let plan = plan_with(&["notes/"]);
        let fields = BTreeMap::new();
        let verdict = engine()
            .evaluate(&input(&plan, &fields, "notes/log.txt", "entry\n", None))
            .unwrap();
        assert!(verdict.allowed);
    }
}
