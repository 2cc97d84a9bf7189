//! Forbidden-pattern registry.
//!
//! The language-specific pattern list is data, not code: a table of
//! `(extension, pattern, context, allow_tag)` rows. The engine iterates the
//! table; adding a language means adding rows. Each row names an allow-tag a
//! plan can declare (`- allow: <tag>` under *Scope & Constraints*) to
//! whitelist its occurrences for writes under that plan.

use once_cell::sync::Lazy;
use regex::Regex;

/// Where a pattern applies within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternContext {
    /// Outside comments; string literals still count as code.
    NonComment,
    /// Outside comments and outside string literals.
    CodeOnly,
    /// Outside comments, strings, and test-gated regions.
    CodeOutsideTests,
}

#[derive(Debug)]
pub struct PatternRule {
    /// File extension the row applies to; `*` applies everywhere.
    pub extension: &'static str,
    pub pattern: &'static str,
    pub context: PatternContext,
    /// Tag a plan may declare to whitelist this rule.
    pub allow_tag: &'static str,
    pub reason: &'static str,
}

pub static RULES: &[PatternRule] = &[
    PatternRule {
        extension: "*",
        pattern: r"(?i)\b(todo|fixme|xxx|hack)\b",
        context: PatternContext::NonComment,
        allow_tag: "stub-markers",
        reason: "stub marker in code",
    },
    PatternRule {
        extension: "*",
        pattern: r"(?i)\b(mock|stub|placeholder)\b",
        context: PatternContext::CodeOutsideTests,
        allow_tag: "stub-markers",
        reason: "stub vocabulary in non-test code",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\.unwrap\s*\(",
        context: PatternContext::CodeOutsideTests,
        allow_tag: "rust-unwrap",
        reason: "unwrap() discards the error path",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\.expect\s*\(",
        context: PatternContext::CodeOutsideTests,
        allow_tag: "rust-expect",
        reason: "expect() discards the error path",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\bpanic!\s*[\(\[]",
        context: PatternContext::CodeOutsideTests,
        allow_tag: "rust-panic",
        reason: "panic! aborts instead of returning an error",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\bunsafe\s*\{",
        context: PatternContext::CodeOnly,
        allow_tag: "rust-unsafe",
        reason: "unsafe block",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\bstatic\s+mut\b",
        context: PatternContext::CodeOnly,
        allow_tag: "rust-static-mut",
        reason: "mutable static",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\btodo!\s*[\(\[]",
        context: PatternContext::CodeOnly,
        allow_tag: "rust-todo",
        reason: "todo! macro",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\bunimplemented!\s*[\(\[]",
        context: PatternContext::CodeOnly,
        allow_tag: "rust-unimplemented",
        reason: "unimplemented! macro",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\bBox\s*::\s*leak\b",
        context: PatternContext::CodeOnly,
        allow_tag: "rust-box-leak",
        reason: "Box::leak hides ownership",
    },
    PatternRule {
        extension: "rs",
        pattern: r"Result<[^<>()]*,\s*Box<dyn\s+(?:std::error::)?Error\b",
        context: PatternContext::CodeOnly,
        allow_tag: "rust-boxed-error",
        reason: "boxed dyn Error erases the failure type",
    },
    PatternRule {
        extension: "rs",
        pattern: r"\bpub\s+fn\s+[A-Za-z_][A-Za-z0-9_]*[^{;]*->\s*Option<",
        context: PatternContext::CodeOutsideTests,
        allow_tag: "rust-option-return",
        reason: "Option as a public fallible return type",
    },
];

#[derive(Debug)]
pub struct CompiledRule {
    pub rule: &'static PatternRule,
    pub regex: Regex,
}

static COMPILED: Lazy<Vec<CompiledRule>> = Lazy::new(|| {
    RULES
        .iter()
        .map(|rule| CompiledRule {
            rule,
            regex: Regex::new(rule.pattern).expect("static registry pattern"),
        })
        .collect()
});

/// Rows applying to a file with the given extension.
pub fn rules_for(extension: &str) -> impl Iterator<Item = &'static CompiledRule> + use<'_> {
    COMPILED
        .iter()
        .filter(move |c| c.rule.extension == "*" || c.rule.extension == extension)
}

// ---------------------------------------------------------------------------
// Context masking
// ---------------------------------------------------------------------------

/// Comment/string family for masking purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `//`, `/* */`, quote characters `"` `'` and backtick.
    CLike,
    /// `#` comments, `'`/`"` strings including triple quotes.
    Python,
    /// No recognised syntax; nothing is masked.
    Plain,
}

pub fn comment_style(extension: &str) -> CommentStyle {
    match extension {
        "rs" | "js" | "jsx" | "ts" | "tsx" | "c" | "h" | "cpp" | "hpp" | "go" | "java" => {
            CommentStyle::CLike
        }
        "py" => CommentStyle::Python,
        _ => CommentStyle::Plain,
    }
}

/// Replace comment text (and optionally string-literal contents) with spaces,
/// preserving length and line structure so match offsets stay meaningful.
pub fn mask(content: &str, style: CommentStyle, mask_strings: bool) -> String {
    match style {
        CommentStyle::CLike => mask_c_like(content, mask_strings),
        CommentStyle::Python => mask_python(content, mask_strings),
        CommentStyle::Plain => content.to_string(),
    }
}

/// Additionally blank `#[cfg(test)]`-gated module bodies so test-only code is
/// exempt from the `CodeOutsideTests` rows. Only meaningful for Rust input.
pub fn mask_rust_test_regions(masked: &str) -> String {
    let mut out: Vec<u8> = masked.as_bytes().to_vec();
    let mut search_from = 0usize;
    while let Some(found) = masked[search_from..].find("#[cfg(test)]") {
        let attr_start = search_from + found;
        // The gated item begins at the next `{` after the attribute.
        let Some(open_rel) = masked[attr_start..].find('{') else {
            break;
        };
        let open = attr_start + open_rel;
        let mut depth = 0usize;
        let mut close = None;
        for (i, b) in masked.as_bytes()[open..].iter().enumerate() {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = close.unwrap_or(masked.len() - 1);
        for b in out.iter_mut().take(end + 1).skip(attr_start) {
            if *b != b'\n' {
                *b = b' ';
            }
        }
        search_from = end + 1;
        if search_from >= masked.len() {
            break;
        }
    }
    String::from_utf8(out).unwrap_or_else(|_| masked.to_string())
}

fn mask_c_like(content: &str, mask_strings: bool) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str(char),
    }
    let mut state = State::Code;
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(ch) = chars.next() {
        match state {
            State::Code => match ch {
                '/' if chars.peek() == Some(&'/') => {
                    state = State::LineComment;
                    chars.next();
                    out.push_str("  ");
                }
                '/' if chars.peek() == Some(&'*') => {
                    state = State::BlockComment;
                    chars.next();
                    out.push_str("  ");
                }
                '"' | '\'' | '`' => {
                    state = State::Str(ch);
                    out.push(ch);
                }
                _ => out.push(ch),
            },
            State::LineComment => {
                if ch == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else if ch == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Str(quote) => {
                if ch == '\\' {
                    out.push(if mask_strings { ' ' } else { ch });
                    if let Some(escaped) = chars.next() {
                        out.push(if mask_strings && escaped != '\n' {
                            ' '
                        } else {
                            escaped
                        });
                    }
                } else if ch == quote {
                    state = State::Code;
                    out.push(ch);
                } else if ch == '\n' {
                    out.push('\n');
                    // Unterminated single-line literal; bail back to code.
                    if quote != '`' {
                        state = State::Code;
                    }
                } else {
                    out.push(if mask_strings { ' ' } else { ch });
                }
            }
        }
    }
    out
}

fn mask_python(content: &str, mask_strings: bool) -> String {
    let mut out = String::with_capacity(content.len());
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0usize;
    let mut in_comment = false;
    let mut string_quote: Option<(char, bool)> = None; // (quote, triple)
    while i < chars.len() {
        let ch = chars[i];
        if in_comment {
            if ch == '\n' {
                in_comment = false;
                out.push('\n');
            } else {
                out.push(' ');
            }
            i += 1;
            continue;
        }
        if let Some((quote, triple)) = string_quote {
            let closes = if triple {
                ch == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)
            } else {
                ch == quote
            };
            if ch == '\\' && !triple {
                out.push(if mask_strings { ' ' } else { ch });
                if i + 1 < chars.len() {
                    out.push(if mask_strings { ' ' } else { chars[i + 1] });
                    i += 2;
                    continue;
                }
            } else if closes {
                let width = if triple { 3 } else { 1 };
                for _ in 0..width {
                    out.push(quote);
                }
                i += width;
                string_quote = None;
                continue;
            } else if ch == '\n' {
                out.push('\n');
                if !triple {
                    string_quote = None;
                }
            } else {
                out.push(if mask_strings { ' ' } else { ch });
            }
            i += 1;
            continue;
        }
        match ch {
            '#' => {
                in_comment = true;
                out.push(' ');
            }
            '\'' | '"' => {
                let triple = chars.get(i + 1) == Some(&ch) && chars.get(i + 2) == Some(&ch);
                let width = if triple { 3 } else { 1 };
                for _ in 0..width {
                    out.push(ch);
                }
                string_quote = Some((ch, triple));
                i += width;
                continue;
            }
            _ => out.push(ch),
        }
        i += 1;
    }
    out
}

/// 1-based line number of a byte offset.
pub fn line_of_offset(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count()
        + 1
}
