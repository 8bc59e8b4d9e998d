//! Collaborator contracts for the work stages delegate.
//!
//! The pipeline never compiles a stylesheet or minifies a script itself. Each
//! stage selects files and hands them to a collaborator behind one of these
//! traits:
//!
//! | Trait | Used by | Default |
//! |-------|---------|---------|
//! | [`TemplateRenderer`] | `build:templates` | [`InterpolationRenderer`] |
//! | [`TextTransform`] | `build:sass`, `build:minify-*` | [`CommandTool`], [`CssCompactor`], [`HtmlCompactor`] |
//! | [`Linter`] | `pre-build:*` | [`CommandLinter`] |
//! | [`CssPruner`] | `build:clean-css` | [`SelectorPruner`] |
//! | [`ImageTool`] | `build:*-images` | [`RasterImageTool`] |
//! | [`MarkupValidator`] | `post-build:validate-html` | [`W3cValidator`] |
//!
//! A [`Toolbox`] bundles one of each. [`Toolbox::from_config`] builds the
//! defaults; tests and embedders replace individual fields.

mod command;
mod compact;
mod prune;
mod raster;
mod template;
mod validator;

pub use command::{CommandLinter, CommandTool};
pub use compact::{CssCompactor, HtmlCompactor};
pub use raster::RasterImageTool;
pub use prune::SelectorPruner;
pub use template::InterpolationRenderer;
pub use validator::W3cValidator;

#[cfg(test)]
pub use raster::tests::{MockImageTool, RecordedOp, create_test_png};

use crate::config::BuildConfig;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no command configured for {0}")]
    NoCommand(&'static str),
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("`{program}` produced invalid UTF-8 output")]
    Utf8 { program: String },
    #[error("{tool} reported {count} problem(s)")]
    Lint { tool: String, count: usize },
    #[error("failed to render {path}: {message}")]
    Render { path: String, message: String },
    #[error("image error: {0}")]
    Image(#[from] ::image::ImageError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// =============================================================================
// Contracts
// =============================================================================

/// Input to a template render.
#[derive(Debug, Clone)]
pub struct TemplateJob {
    /// Path relative to the source root, for messages.
    pub relative_path: String,
    pub source: String,
    pub context: Value,
    /// Markdown extension flags (`tables`, `footnotes`, ...).
    pub markdown: Map<String, Value>,
    /// Renderer options from the stage configuration.
    pub options: Map<String, Value>,
}

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, job: &TemplateJob) -> Result<String, ToolError>;
}

/// Text in, text out: stylesheet compilers and minifiers.
#[async_trait]
pub trait TextTransform: Send + Sync {
    /// `source` is the file the text came from, for tools that resolve
    /// imports relative to it.
    async fn transform(
        &self,
        source: &Path,
        input: &str,
        options: &Map<String, Value>,
    ) -> Result<String, ToolError>;
}

/// One problem reported by a linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintProblem {
    pub file: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub tool: String,
    pub problems: Vec<LintProblem>,
}

impl LintReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }

    /// Files with at least one problem.
    pub fn failed_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self.problems.iter().map(|p| p.file.as_str()).collect();
        files.dedup();
        files
    }

    /// Log every problem and fail if there were any.
    pub fn fail_on_error(&self) -> Result<(), ToolError> {
        for problem in &self.problems {
            tracing::error!(tool = %self.tool, file = %problem.file, "{}", problem.message);
        }
        if self.is_clean() {
            Ok(())
        } else {
            Err(ToolError::Lint {
                tool: self.tool.clone(),
                count: self.problems.len(),
            })
        }
    }
}

#[async_trait]
pub trait Linter: Send + Sync {
    /// Lint `files` (relative to `root`).
    async fn lint(
        &self,
        root: &Path,
        files: &[PathBuf],
        config_path: Option<&Path>,
    ) -> Result<LintReport, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pruned {
    pub css: String,
    /// Number of rules dropped.
    pub removed: usize,
}

pub trait CssPruner: Send + Sync {
    /// Drop rules never used by `markup`. Selectors matching an `ignore`
    /// entry are always kept.
    fn prune(&self, css: &str, markup: &[String], ignore: &[String]) -> Pruned;
}

/// Raster operations. Synchronous: stages call these from blocking tasks.
pub trait ImageTool: Send + Sync {
    fn resize(&self, source: &Path, target: &Path, width: u32, height: u32)
    -> Result<(), ToolError>;

    /// Re-encode `path`. Returns the new bytes only when they are smaller.
    fn optimize(&self, path: &Path) -> Result<Option<Vec<u8>>, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupMessage {
    pub kind: MessageKind,
    pub message: String,
    pub line: Option<u64>,
}

#[async_trait]
pub trait MarkupValidator: Send + Sync {
    /// Whether the validation service can be reached.
    async fn is_available(&self) -> bool;

    async fn validate(&self, name: &str, html: &str) -> Result<Vec<MarkupMessage>, ToolError>;
}

// =============================================================================
// Toolbox
// =============================================================================

/// One collaborator per role.
#[derive(Clone)]
pub struct Toolbox {
    pub renderer: Arc<dyn TemplateRenderer>,
    pub sass: Arc<dyn TextTransform>,
    pub minify_js: Arc<dyn TextTransform>,
    pub minify_html: Arc<dyn TextTransform>,
    pub minify_css: Arc<dyn TextTransform>,
    pub validate_js: Arc<dyn Linter>,
    pub lint_js: Arc<dyn Linter>,
    pub lint_sass: Arc<dyn Linter>,
    pub css_pruner: Arc<dyn CssPruner>,
    pub images: Arc<dyn ImageTool>,
    pub markup_validator: Arc<dyn MarkupValidator>,
}

impl Toolbox {
    pub fn from_config(config: &BuildConfig) -> Self {
        let tools = &config.tools;
        let endpoint = config
            .validate_html
            .as_ref()
            .map(|v| v.options.endpoint.clone())
            .unwrap_or_else(|| crate::config::ValidateHtmlOptions::default().endpoint);
        Self {
            renderer: Arc::new(InterpolationRenderer),
            sass: Arc::new(CommandTool::new("sass", tools.sass.clone())),
            minify_js: Arc::new(CommandTool::new("minify_js", tools.minify_js.clone())),
            minify_html: Arc::new(HtmlCompactor),
            minify_css: Arc::new(CssCompactor),
            validate_js: Arc::new(CommandLinter::per_file(
                "validate_js",
                tools.validate_js.clone(),
            )),
            lint_js: Arc::new(CommandLinter::batch("lint_js", tools.lint_js.clone())),
            lint_sass: Arc::new(CommandLinter::batch("lint_sass", tools.lint_sass.clone())),
            css_pruner: Arc::new(SelectorPruner),
            images: Arc::new(RasterImageTool),
            markup_validator: Arc::new(W3cValidator::new(endpoint)),
        }
    }
}

impl Default for Toolbox {
    fn default() -> Self {
        Self::from_config(&BuildConfig::default())
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox").finish_non_exhaustive()
    }
}

/// Render stage options as command-line flags: `{"style": "compressed"}`
/// becomes `--style=compressed`, `true` becomes a bare `--flag`, and `false`
/// or `null` is dropped.
pub fn option_flags(options: &Map<String, Value>) -> Vec<String> {
    options
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Null | Value::Bool(false) => None,
            Value::Bool(true) => Some(format!("--{key}")),
            Value::String(s) => Some(format!("--{key}={s}")),
            other => Some(format!("--{key}={other}")),
        })
        .collect()
}
