//! Unified-diff application for patch-mode writes.
//!
//! A `write_file` caller may supply a unified diff instead of full content.
//! Application is strict: hunks must arrive in order, and every context and
//! removal line must match the current file exactly at the position the
//! hunk header names. Any mismatch refuses the patch; the gate never writes
//! a half-applied result. File headers (`---`/`+++`/`diff`/`index`) are
//! tolerated and ignored; the target path comes from the request, not the
//! diff.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{ErrorCode, GatewayError};

static HUNK_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("static regex")
});

/// One parsed `@@` hunk.
struct Hunk {
    old_start: usize,
    old_count: usize,
    lines: Vec<HunkLine>,
}

enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
    /// `\ No newline at end of file`, applying to the preceding line.
    NoNewline,
}

/// Apply a unified diff to `prior`, returning the patched content.
pub fn apply_unified_patch(prior: &str, patch: &str) -> Result<String, GatewayError> {
    let hunks = parse(patch)?;
    if hunks.is_empty() {
        return Err(malformed("the patch contains no hunks"));
    }

    let prior_ends_nl = prior.ends_with('\n');
    let old_lines: Vec<&str> = split_lines(prior);

    let mut out: Vec<String> = Vec::with_capacity(old_lines.len());
    let mut out_ends_nl = true;
    let mut cursor = 0usize;

    for hunk in &hunks {
        // `-N,0` means the hunk inserts after line N; otherwise the hunk
        // consumes old lines starting at N (1-based).
        let hunk_at = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if hunk_at < cursor {
            return Err(malformed("hunks overlap or are out of order"));
        }
        if hunk_at > old_lines.len() {
            return Err(mismatch(format!(
                "hunk starts at line {} but the file has {} lines",
                hunk.old_start,
                old_lines.len()
            )));
        }
        for line in &old_lines[cursor..hunk_at] {
            out.push((*line).to_string());
        }
        cursor = hunk_at;

        let mut last_was_add = false;
        for hunk_line in &hunk.lines {
            match hunk_line {
                HunkLine::Context(text) => {
                    let Some(actual) = old_lines.get(cursor) else {
                        return Err(mismatch(format!(
                            "context line {} runs past the end of the file",
                            cursor + 1
                        )));
                    };
                    if actual != text {
                        return Err(mismatch(format!(
                            "context mismatch at line {}: expected '{}', found '{}'",
                            cursor + 1,
                            text,
                            actual
                        )));
                    }
                    out.push(text.clone());
                    cursor += 1;
                    last_was_add = false;
                }
                HunkLine::Remove(text) => {
                    let Some(actual) = old_lines.get(cursor) else {
                        return Err(mismatch(format!(
                            "removal at line {} runs past the end of the file",
                            cursor + 1
                        )));
                    };
                    if actual != text {
                        return Err(mismatch(format!(
                            "removal mismatch at line {}: expected '{}', found '{}'",
                            cursor + 1,
                            text,
                            actual
                        )));
                    }
                    cursor += 1;
                    last_was_add = false;
                }
                HunkLine::Add(text) => {
                    out.push(text.clone());
                    last_was_add = true;
                }
                HunkLine::NoNewline => {
                    if last_was_add {
                        out_ends_nl = false;
                    }
                }
            }
        }
    }

    let patched_to_end = cursor >= old_lines.len();
    for line in &old_lines[cursor..] {
        out.push((*line).to_string());
    }
    if !patched_to_end {
        // The tail was copied verbatim, so the prior's ending wins.
        out_ends_nl = prior_ends_nl;
    }

    let mut result = out.join("\n");
    if out_ends_nl && !out.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn parse(patch: &str) -> Result<Vec<Hunk>, GatewayError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for (number, line) in patch.lines().enumerate() {
        if let Some(captures) = HUNK_HEADER_RE.captures(line) {
            if let Some(done) = current.take() {
                hunks.push(done);
            }
            let old_start = captures[1].parse::<usize>().map_err(|_| {
                malformed(format!("unreadable hunk header on line {}", number + 1))
            })?;
            let old_count = captures
                .get(2)
                .map(|m| m.as_str().parse::<usize>())
                .transpose()
                .map_err(|_| malformed(format!("unreadable hunk header on line {}", number + 1)))?
                .unwrap_or(1);
            current = Some(Hunk {
                old_start,
                old_count,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            // File headers and preamble before the first hunk.
            if line.starts_with("--- ")
                || line.starts_with("+++ ")
                || line.starts_with("diff ")
                || line.starts_with("index ")
                || line.trim().is_empty()
            {
                continue;
            }
            return Err(malformed(format!(
                "line {} appears before any hunk header",
                number + 1
            )));
        };

        if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_string()));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(text.to_string()));
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_string()));
        } else if line.starts_with('\\') {
            hunk.lines.push(HunkLine::NoNewline);
        } else if line.is_empty() {
            // Some producers emit bare empty lines for empty context.
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(malformed(format!(
                "line {} is neither context, addition, nor removal",
                number + 1
            )));
        }
    }
    if let Some(done) = current.take() {
        hunks.push(done);
    }
    Ok(hunks)
}

fn split_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.split('\n').collect();
    if content.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn malformed(detail: impl Into<String>) -> GatewayError {
    GatewayError::refusal(
        ErrorCode::InvalidInputFormat,
        format!("malformed patch: {}", detail.into()),
    )
}

fn mismatch(detail: String) -> GatewayError {
    GatewayError::refusal(
        ErrorCode::InvalidInputValue,
        format!("patch does not apply: {}", detail),
    )
}
