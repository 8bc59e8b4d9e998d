//! Built-in whitespace and comment compaction for stylesheets and markup.
//!
//! Only whitespace and comments are removed; code is never reordered or
//! rewritten. Aggressive minification needs an external program.

use super::{TextTransform, ToolError};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::LazyLock;

fn flag(options: &Map<String, Value>, key: &str, default: bool) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Strips comments and collapses whitespace in CSS. String literals are
/// copied untouched and `/*! ... */` license comments are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssCompactor;

pub fn compact_css(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    let mut pending_space = false;
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
                while let Some(next) = chars.next() {
                    out.push(next);
                    if next == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if next == c {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let keep = chars.peek() == Some(&'!');
                let mut comment = String::from("/*");
                let mut prev = '\0';
                for next in chars.by_ref() {
                    comment.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                if keep {
                    flush_space(&mut out, &mut pending_space);
                    out.push_str(&comment);
                }
            }
            c if c.is_whitespace() => pending_space = true,
            // A space before `:` is a descendant combinator in selectors.
            ':' if depth == 0 => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
            }
            '{' | '}' | ':' | ';' | ',' | '>' => {
                pending_space = false;
                match c {
                    '{' => depth += 1,
                    '}' => depth = depth.saturating_sub(1),
                    _ => {}
                }
                if c == '}' && out.ends_with(';') {
                    out.pop();
                }
                out.push(c);
                // Spaces after a separator are never significant.
                while chars.peek().is_some_and(|n| n.is_whitespace()) {
                    chars.next();
                }
            }
            c => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
            }
        }
    }
    out.trim().to_string()
}

fn flush_space(out: &mut String, pending: &mut bool) {
    if *pending && !out.is_empty() {
        out.push(' ');
    }
    *pending = false;
}

#[async_trait]
impl TextTransform for CssCompactor {
    async fn transform(
        &self,
        _source: &Path,
        input: &str,
        _options: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        Ok(compact_css(input))
    }
}

static RAW_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(pre|textarea|script|style)\b.*?</(?:pre|textarea|script|style)\s*>")
        .expect("raw block pattern must compile")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern must compile"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern must compile"));

static BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*\n\s*<").expect("tag gap pattern must compile"));

/// Removes comments and collapses whitespace in HTML.
///
/// Options: `remove_comments` (default `true`), `collapse_whitespace`
/// (default `true`). Conditional comments (`<!--[if ...]>`) and the content
/// of `pre`, `textarea`, `script` and `style` elements are preserved.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlCompactor;

pub fn compact_html(html: &str, remove_comments: bool, collapse_whitespace: bool) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for block in RAW_BLOCK.find_iter(html) {
        out.push_str(&compact_html_text(
            &html[last..block.start()],
            remove_comments,
            collapse_whitespace,
        ));
        out.push_str(block.as_str());
        last = block.end();
    }
    out.push_str(&compact_html_text(
        &html[last..],
        remove_comments,
        collapse_whitespace,
    ));
    out.trim().to_string()
}

fn compact_html_text(text: &str, remove_comments: bool, collapse_whitespace: bool) -> String {
    let mut text = if remove_comments {
        COMMENT
            .replace_all(text, |caps: &regex::Captures| {
                let comment = &caps[0];
                if comment.starts_with("<!--[if") || comment.starts_with("<!--<![endif") {
                    comment.to_string()
                } else {
                    String::new()
                }
            })
            .into_owned()
    } else {
        text.to_string()
    };
    if collapse_whitespace {
        text = BETWEEN_TAGS.replace_all(&text, "><").into_owned();
        text = WHITESPACE.replace_all(&text, " ").into_owned();
    }
    text
}

#[async_trait]
impl TextTransform for HtmlCompactor {
    async fn transform(
        &self,
        _source: &Path,
        input: &str,
        options: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        Ok(compact_html(
            input,
            flag(options, "remove_comments", true),
            flag(options, "collapse_whitespace", true),
        ))
    }
}
