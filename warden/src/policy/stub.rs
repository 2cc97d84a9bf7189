//! Syntactic stub detection.
//!
//! A shape-level scan for the cheapest way to fake progress: functions with
//! empty bodies, swallowed exception handlers, and bodies whose only
//! statement returns a nullary placeholder. The scanner is a token-level
//! brace matcher over comment/string-masked text, not a full parser;
//! content it cannot shape-scan falls through to the textual stages.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::policy::registry::{comment_style, line_of_offset, mask, CommentStyle};

#[derive(Debug, Clone, PartialEq)]
pub struct StubFinding {
    pub line: usize,
    pub reason: String,
}

/// Function-ish headers whose `{` starts a body worth inspecting.
static C_LIKE_HEADERS: Lazy<Vec<(Regex, HeaderKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\bfn\s+[A-Za-z_][A-Za-z0-9_]*[^{;]*\{").expect("static regex"),
            HeaderKind::Function,
        ),
        (
            Regex::new(r"\bfunction\b[^{;]*\{").expect("static regex"),
            HeaderKind::Function,
        ),
        (
            Regex::new(r"=>\s*\{").expect("static regex"),
            HeaderKind::Function,
        ),
        (
            Regex::new(r"\bcatch\b\s*(\([^)]*\))?\s*\{").expect("static regex"),
            HeaderKind::Handler,
        ),
    ]
});

static PLACEHOLDER_RETURN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^return\s*(null|undefined|None|\{\s*\}|\[\s*\])\s*;?$").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKind {
    Function,
    Handler,
}

/// Scan `content` for stub shapes, keyed by file extension.
pub fn scan_stub_shapes(extension: &str, content: &str) -> Vec<StubFinding> {
    match comment_style(extension) {
        CommentStyle::CLike => scan_c_like(content),
        CommentStyle::Python => scan_python(content),
        CommentStyle::Plain => Vec::new(),
    }
}

fn scan_c_like(content: &str) -> Vec<StubFinding> {
    let masked = mask(content, CommentStyle::CLike, true);
    let mut findings = Vec::new();

    for (header, kind) in C_LIKE_HEADERS.iter() {
        for m in header.find_iter(&masked) {
            let open = m.end() - 1;
            let Some(close) = match_brace(masked.as_bytes(), open) else {
                continue;
            };
            let body = masked[open + 1..close].trim();
            let line = line_of_offset(&masked, m.start());
            if body.is_empty() {
                let reason = match kind {
                    HeaderKind::Function => "empty function body",
                    HeaderKind::Handler => "empty exception handler",
                };
                findings.push(StubFinding {
                    line,
                    reason: reason.to_string(),
                });
            } else if *kind == HeaderKind::Function
                && !body.contains('{')
                && PLACEHOLDER_RETURN.is_match(body)
            {
                findings.push(StubFinding {
                    line,
                    reason: "function body only returns a nullary placeholder".to_string(),
                });
            }
        }
    }
    findings.sort_by_key(|f| f.line);
    findings.dedup();
    findings
}

fn match_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn scan_python(content: &str) -> Vec<StubFinding> {
    let masked = mask(content, CommentStyle::Python, true);
    let lines: Vec<&str> = masked.lines().collect();
    let mut findings = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let is_def = trimmed.starts_with("def ") && trimmed.trim_end().ends_with(':');
        let is_handler = trimmed.starts_with("except") && trimmed.trim_end().ends_with(':');
        if !is_def && !is_handler {
            continue;
        }

        // Collect the statement lines of the suite (deeper indent).
        let mut body: Vec<&str> = Vec::new();
        for body_line in lines.iter().skip(i + 1) {
            if body_line.trim().is_empty() {
                continue;
            }
            let body_indent = body_line.len() - body_line.trim_start().len();
            if body_indent <= indent {
                break;
            }
            body.push(body_line.trim());
        }

        let is_stub = match body.as_slice() {
            [] => true,
            [only] => matches!(*only, "pass" | "..." | "return" | "return None"),
            _ => false,
        };
        if is_stub {
            let reason = if is_handler {
                "empty exception handler"
            } else if body.is_empty() {
                "empty function body"
            } else {
                "function body only returns a nullary placeholder"
            };
            findings.push(StubFinding {
                line: i + 1,
                reason: reason.to_string(),
            });
        }
    }
    findings
}
