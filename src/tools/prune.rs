//! Unused-selector removal.
//!
//! A class or id counts as used when it appears as a whole word anywhere in
//! the scanned markup, so classes toggled from scripts survive as long as
//! their names appear in the files passed in. Element, attribute and
//! universal selectors are always kept. Rules inside `@media` and
//! `@supports` are pruned recursively; every other at-rule is kept verbatim.

use super::{CssPruner, Pruned};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static NAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.#](-?[_a-zA-Z][_a-zA-Z0-9-]*)").expect("selector pattern must compile")
});

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("attribute pattern must compile"));

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_a-zA-Z0-9-]+").expect("word pattern must compile"));

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorPruner;

impl CssPruner for SelectorPruner {
    fn prune(&self, css: &str, markup: &[String], ignore: &[String]) -> Pruned {
        if markup.is_empty() {
            return Pruned {
                css: css.to_string(),
                removed: 0,
            };
        }
        let used: HashSet<&str> = markup
            .iter()
            .flat_map(|m| WORD.find_iter(m).map(|w| w.as_str()))
            .collect();
        let mut removed = 0;
        let css = prune_block(css, &used, ignore, &mut removed);
        Pruned { css, removed }
    }
}

fn selector_used(selector: &str, used: &HashSet<&str>, ignore: &[String]) -> bool {
    if ignore.iter().any(|i| selector.contains(i.as_str())) {
        return true;
    }
    let without_attributes = ATTRIBUTE.replace_all(selector, "");
    NAMED
        .captures_iter(&without_attributes)
        .all(|caps| used.contains(&caps[1]))
}

/// Index just past the matching `}` for the `{` at `open`, skipping strings
/// and comments.
fn block_end(css: &str, open: usize) -> usize {
    let bytes = css.as_bytes();
    let mut depth = 0;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = string_end(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = comment_end(css, i),
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn string_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn comment_end(css: &str, start: usize) -> usize {
    css[start + 2..]
        .find("*/")
        .map_or(css.len(), |i| start + 2 + i + 2)
}

fn prune_block(css: &str, used: &HashSet<&str>, ignore: &[String], removed: &mut usize) -> String {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = string_end(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                // Comments between rules are kept as they are.
                let end = comment_end(css, i);
                if css[start..i].trim().is_empty() {
                    out.push_str(&css[i..end]);
                    start = end;
                }
                i = end;
            }
            b';' => {
                out.push_str(&css[start..=i]);
                i += 1;
                start = i;
            }
            b'{' => {
                let end = block_end(css, i);
                let prelude = css[start..i].trim();
                let body_end = end.saturating_sub(1).max(i + 1);
                let body = &css[i + 1..body_end];
                if prelude.starts_with("@media") || prelude.starts_with("@supports") {
                    let inner = prune_block(body, used, ignore, removed);
                    if !inner.trim().is_empty() {
                        out.push_str(&css[start..=i]);
                        out.push_str(&inner);
                        out.push('}');
                    }
                } else if prelude.starts_with('@') {
                    out.push_str(&css[start..end]);
                } else {
                    let selectors: Vec<&str> = prelude
                        .split(',')
                        .map(str::trim)
                        .filter(|s| selector_used(s, used, ignore))
                        .collect();
                    if selectors.is_empty() {
                        *removed += 1;
                    } else {
                        let raw = &css[start..i];
                        out.push_str(&raw[..raw.len() - raw.trim_start().len()]);
                        out.push_str(&selectors.join(", "));
                        out.push_str(" {");
                        out.push_str(body);
                        out.push('}');
                    }
                }
                i = end;
                start = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&css[start..]);
    out
}
