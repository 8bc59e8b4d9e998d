//! Scanning text artifacts for path references.
//!
//! Recognized tokens:
//!
//! | Form | Where |
//! |------|-------|
//! | `href="…"`, `href='…'` | markup |
//! | `src="…"`, `src='…'` | markup |
//! | `url(…)`, quoted or bare | stylesheets, inline styles |
//! | `@@(…)` | explicit placeholder, any text file |
//! | `"…"`, `'…'` | string literals in scripts and JSON |
//!
//! A token is only a candidate; it is resolved against the tree with
//! [`resolve`], and external references (schemes, protocol-relative URLs,
//! fragments) are never resolved.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static MARKUP_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"@@\(([^)]*)\)|\bhref\s*=\s*"([^"]*)"|\bhref\s*=\s*'([^']*)'|\bsrc\s*=\s*"([^"]*)"|\bsrc\s*=\s*'([^']*)'|url\(\s*"([^"]*)"\s*\)|url\(\s*'([^']*)'\s*\)|url\(\s*([^)'"\s]+)\s*\)"#,
    )
    .expect("reference pattern must compile")
});

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"\\\n]*)"|'([^'\\\n]*)'"#).expect("string literal pattern must compile")
});

static SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").expect("scheme pattern must compile")
});

/// How a file's content is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Attributes, `url()` and placeholders (HTML, CSS, SVG, XML).
    Markup,
    /// Everything `Markup` finds plus string literals (JS, JSON).
    Script,
}

impl ContentKind {
    pub fn for_extension(ext: &str) -> Option<Self> {
        match ext {
            "html" | "htm" | "css" | "svg" | "xml" | "txt" => Some(ContentKind::Markup),
            "js" | "mjs" | "cjs" | "json" | "webmanifest" | "map" => Some(ContentKind::Script),
            _ => None,
        }
    }
}

/// A path-like token found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte range of the whole match to replace. For a placeholder this
    /// covers `@@(…)`, otherwise just the path value.
    pub span: Range<usize>,
    pub value: String,
    pub placeholder: bool,
    /// Found as a bare string literal rather than in a reference position.
    pub literal: bool,
}

/// Find reference tokens in `text`, in order of appearance.
pub fn scan(text: &str, kind: ContentKind) -> Vec<Token> {
    let mut tokens = Vec::new();
    for caps in MARKUP_REF.captures_iter(text) {
        let Some((index, group)) = caps
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(i, m)| m.map(|m| (i, m)))
        else {
            continue;
        };
        let placeholder = index == 1;
        let span = if placeholder {
            caps.get(0).map_or(group.range(), |m| m.range())
        } else {
            group.range()
        };
        tokens.push(Token {
            span,
            value: group.as_str().to_string(),
            placeholder,
            literal: false,
        });
    }
    if kind == ContentKind::Script {
        for caps in STRING_LITERAL.captures_iter(text) {
            let Some(group) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            let overlaps = tokens
                .iter()
                .any(|t| t.span.start < group.end() && group.start() < t.span.end);
            if !overlaps && looks_like_path(group.as_str()) {
                tokens.push(Token {
                    span: group.range(),
                    value: group.as_str().to_string(),
                    placeholder: false,
                    literal: true,
                });
            }
        }
        tokens.sort_by_key(|t| t.span.start);
    }
    tokens
}

/// String literals only count when they look like a file path.
fn looks_like_path(value: &str) -> bool {
    !value.is_empty()
        && !value.contains(char::is_whitespace)
        && !value.contains("{{")
        && super::naming::file_name(value).contains('.')
}

/// True for references that never point into the working tree.
pub fn is_external(value: &str) -> bool {
    value.starts_with('#') || value.starts_with("//") || SCHEME.is_match(value)
}

/// Split `path?query#fragment` into the path and the rest.
pub fn split_suffix(value: &str) -> (&str, &str) {
    match value.find(['?', '#']) {
        Some(i) => value.split_at(i),
        None => (value, ""),
    }
}

/// Resolve a token against the tree.
///
/// A leading `/` is relative to the tree root, anything else to the directory
/// of `from`. Returns the normalized root-relative path and the untouched
/// suffix, or `None` for external, templated, empty, or escaping references.
pub fn resolve<'a>(from: &str, value: &'a str) -> Option<(String, &'a str)> {
    let value = value.trim();
    if value.is_empty() || value.contains("{{") || is_external(value) {
        return None;
    }
    let (path, suffix) = split_suffix(value);
    if path.is_empty() {
        return None;
    }
    let mut segments: Vec<&str> = Vec::new();
    if !path.starts_with('/') {
        let dir = from.rfind('/').map_or("", |i| &from[..i]);
        segments.extend(dir.split('/').filter(|s| !s.is_empty()));
    }
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some((segments.join("/"), suffix))
}
