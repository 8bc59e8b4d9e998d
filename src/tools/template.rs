//! Minimal template rendering.
//!
//! Not a template engine: it covers what static pages need from their data
//! files and nothing more.
//!
//! | Syntax | Effect |
//! |--------|--------|
//! | `{{ site.title }}` | value at a dotted path in the context; missing paths render empty |
//! | `{% markdown %}...{% endmarkdown %}` | block rendered with `pulldown-cmark` |
//! | `{# note #}` | removed |
//!
//! Markdown blocks are dedented before rendering, so they can be indented to
//! match the surrounding markup. With `options.autoescape = true`
//! interpolated strings are HTML-escaped.

use super::{TemplateJob, TemplateRenderer, ToolError};
use async_trait::async_trait;
use pulldown_cmark::{Options, Parser, html as md_html};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{#.*?#\}").expect("comment pattern must compile"));

static MARKDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%\s*markdown\s*%\}(.*?)\{%\s*endmarkdown\s*%\}")
        .expect("markdown pattern must compile")
});

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .expect("variable pattern must compile")
});

static UNCLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%\s*(?:end)?markdown\s*%\}").expect("tag pattern must compile")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolationRenderer;

#[async_trait]
impl TemplateRenderer for InterpolationRenderer {
    async fn render(&self, job: &TemplateJob) -> Result<String, ToolError> {
        render(job)
    }
}

pub fn render(job: &TemplateJob) -> Result<String, ToolError> {
    let without_comments = COMMENT.replace_all(&job.source, "");
    let with_markdown = MARKDOWN.replace_all(&without_comments, |caps: &Captures| {
        markdown_to_html(&dedent(&caps[1]), &job.markdown)
    });
    if let Some(stray) = UNCLOSED.find(&with_markdown) {
        return Err(ToolError::Render {
            path: job.relative_path.clone(),
            message: format!("unmatched `{}`", stray.as_str()),
        });
    }
    let autoescape = job
        .options
        .get("autoescape")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let rendered = VARIABLE.replace_all(&with_markdown, |caps: &Captures| {
        match lookup(&job.context, &caps[1]) {
            Some(value) => display_value(value, autoescape),
            None => {
                tracing::debug!(template = %job.relative_path, key = &caps[1], "missing template value");
                String::new()
            }
        }
    });
    Ok(rendered.into_owned())
}

/// Value at a dotted path. Numeric segments index arrays.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display_value(value: &Value, autoescape: bool) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if autoescape { escape_html(&text) } else { text }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn markdown_options(flags: &Map<String, Value>) -> Options {
    let mut options = Options::empty();
    for (key, flag) in [
        ("tables", Options::ENABLE_TABLES),
        ("footnotes", Options::ENABLE_FOOTNOTES),
        ("strikethrough", Options::ENABLE_STRIKETHROUGH),
        ("tasklists", Options::ENABLE_TASKLISTS),
        ("smart_punctuation", Options::ENABLE_SMART_PUNCTUATION),
        ("heading_attributes", Options::ENABLE_HEADING_ATTRIBUTES),
    ] {
        if flags.get(key).and_then(Value::as_bool).unwrap_or(false) {
            options.insert(flag);
        }
    }
    options
}

fn markdown_to_html(text: &str, flags: &Map<String, Value>) -> String {
    let parser = Parser::new_ext(text, markdown_options(flags));
    let mut html = String::new();
    md_html::push_html(&mut html, parser);
    html
}

/// Strip the leading whitespace shared by all non-blank lines. Only an
/// identical prefix counts, so tabs and spaces never cancel each other out.
fn dedent(text: &str) -> String {
    let mut indents = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| &l[..l.len() - l.trim_start().len()]);
    let first = indents.next().unwrap_or("");
    let common = indents.fold(first, |common, indent| {
        let shared: usize = common
            .chars()
            .zip(indent.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();
        &common[..shared]
    });
    text.lines()
        .map(|l| l.strip_prefix(common).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}
