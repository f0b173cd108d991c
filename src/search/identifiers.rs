//! Code identifier extraction.
//!
//! Pulls the lowercased set of code-ish tokens out of a text: fenced and
//! inline code bodies, camelCase/PascalCase tokens of length >= 3,
//! snake_case tokens, and identifiers in call position. The retriever
//! intersects these sets for the rerank code-match signal; the assembler
//! uses them to detect code-heavy queries.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z0-9+#-]*\n?(.*?)```").expect("valid regex"));
static INLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"));
static CAMEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z][a-z0-9]*[A-Z][A-Za-z0-9]*\b").expect("valid regex"));
static SNAKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z][A-Za-z0-9]*_[A-Za-z0-9_]+\b").expect("valid regex"));
static CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex"));
static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]{2,}\b").expect("valid regex"));

/// Keywords that mark a query as code-flavored even without identifiers
const CODE_KEYWORDS: &[&str] = &[
    "fn", "function", "async", "await", "class", "struct", "impl", "def", "return", "import",
    "const", "let", "var", "enum", "trait", "interface", "lambda", "typedef",
];

/// Extract the lowercased set of code identifiers from a text.
pub fn extract_code_identifiers(text: &str) -> HashSet<String> {
    let mut identifiers = HashSet::new();

    // Code spans first: every identifier-shaped word inside them counts
    let mut code_bodies = Vec::new();
    for capture in FENCED_RE.captures_iter(text) {
        code_bodies.push(capture[1].to_string());
    }
    let without_fences = FENCED_RE.replace_all(text, " ");
    for capture in INLINE_RE.captures_iter(&without_fences) {
        code_bodies.push(capture[1].to_string());
    }
    for body in &code_bodies {
        for word in WORD_RE.find_iter(body) {
            identifiers.insert(word.as_str().to_lowercase());
        }
    }

    for token in CAMEL_RE.find_iter(text) {
        if token.as_str().chars().count() >= 3 {
            identifiers.insert(token.as_str().to_lowercase());
        }
    }
    for token in SNAKE_RE.find_iter(text) {
        identifiers.insert(token.as_str().to_lowercase());
    }
    for capture in CALL_RE.captures_iter(text) {
        identifiers.insert(capture[1].to_lowercase());
    }

    identifiers
}

/// Whether a query reads as code-heavy: backticks or fences, any extracted
/// identifier, or a programming keyword.
pub fn is_code_heavy(query: &str) -> bool {
    if query.contains('`') {
        return true;
    }
    if query
        .split_whitespace()
        .any(|word| CODE_KEYWORDS.contains(&word.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric())))
    {
        return true;
    }
    !extract_code_identifiers(query).is_empty()
}
