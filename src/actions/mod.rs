//! Stage actions: what each entry of the stage table actually does.
//!
//! Every action receives the [`RunContext`] of the build it belongs to and
//! works on the run's temporary tree (`build_path`). Pre-build stages read
//! from `src_path`; nothing here touches `dist_path`, which only the
//! orchestrator writes when it promotes a successful run.
//!
//! | Stage | Reads | Writes |
//! |-------|-------|--------|
//! | `pre-build:*` | src | nothing |
//! | `build:setup` | src | build (fresh copy) |
//! | `build:templates`, `build:sass` | src | build |
//! | `build:collect-assets` .. `build:revision` | build | build |
//! | `build:clean` | build | build (removals) |
//! | `post-build:*` | build | nothing |

mod assets;
mod images;
mod lint;
mod meta;
mod prune;
mod revision;
mod setup;
mod templates;
mod transform;
mod validate;

pub use assets::{Bundle, BundleKind, CollectedPage, collect_blocks};
pub use images::variant_path;
pub use setup::{remove_dir_if_exists, remove_selected};

use crate::cache::{CacheStats, StageCache};
use crate::config::BuildConfig;
use crate::pattern::{PatternError, slash_path};
use crate::report::{self, BuildReport};
use crate::stages::StageId;
use crate::tools::{ToolError, Toolbox};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Failed(String),
}

/// What a stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Ran to completion, with an optional one-line summary.
    Completed(Option<String>),
    /// Could not run in this environment (e.g. offline); not a failure.
    Unavailable(String),
}

/// Everything a stage may use. Owned by one build run.
pub struct RunContext {
    pub run_id: u64,
    pub config: Arc<BuildConfig>,
    pub tools: Arc<Toolbox>,
    pub cache: Arc<StageCache>,
    pub stats: CacheStats,
    pub report: Option<BuildReport>,
}

impl RunContext {
    pub fn new(
        run_id: u64,
        config: Arc<BuildConfig>,
        tools: Arc<Toolbox>,
        cache: Arc<StageCache>,
    ) -> Self {
        Self {
            run_id,
            config,
            tools,
            cache,
            stats: CacheStats::default(),
            report: None,
        }
    }

    pub fn src(&self) -> &Path {
        &self.config.src_path
    }

    pub fn build(&self) -> &Path {
        &self.config.build_path
    }
}

/// Run one stage.
pub async fn run(stage: StageId, ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    match stage {
        StageId::ValidateJs => lint::validate_js(ctx).await,
        StageId::LintJs => lint::lint_js(ctx).await,
        StageId::LintSass => lint::lint_sass(ctx).await,
        StageId::Setup => setup::setup(ctx).await,
        StageId::Templates => templates::render_templates(ctx).await,
        StageId::Sass => transform::sass(ctx).await,
        StageId::CollectAssets => assets::collect_assets(ctx).await,
        StageId::MinifyJs => transform::minify(ctx, StageId::MinifyJs).await,
        StageId::MinifyHtml => transform::minify(ctx, StageId::MinifyHtml).await,
        StageId::CleanCss => prune::clean_css(ctx).await,
        StageId::MinifyCss => transform::minify(ctx, StageId::MinifyCss).await,
        StageId::Sitemap => meta::sitemap(ctx).await,
        StageId::Browserconfig => meta::browserconfig(ctx).await,
        StageId::GenerateImages => images::generate_images(ctx).await,
        StageId::OptimizeImages => images::optimize_images(ctx).await,
        StageId::Revision => revision::revision(ctx).await,
        StageId::Clean => setup::clean(ctx).await,
        StageId::ValidateHtml => validate::validate_html(ctx).await,
        StageId::Report => build_report(ctx).await,
    }
}

async fn build_report(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let root = ctx.build().to_path_buf();
    let collected = tokio::task::spawn_blocking(move || BuildReport::collect(&root)).await??;
    report::print_report(&collected);
    let summary = format!(
        "{} files, {}",
        collected.total_files(),
        report::format_size(collected.total_size())
    );
    ctx.report = Some(collected);
    Ok(StageOutcome::Completed(Some(summary)))
}

// =============================================================================
// Shared helpers
// =============================================================================

/// The configuration slot of an enabled stage.
fn slot<T>(slot: &Option<T>, stage: StageId) -> Result<&T, StageError> {
    slot.as_ref()
        .ok_or_else(|| StageError::Failed(format!("{stage} has no configuration")))
}

async fn read_to_string(path: &Path) -> Result<String, StageError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StageError::File {
            path: path.to_path_buf(),
            source,
        })
}

async fn read(path: &Path) -> Result<Vec<u8>, StageError> {
    tokio::fs::read(path).await.map_err(|source| StageError::File {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a file, creating its parent directories.
async fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| StageError::File {
            path: path.to_path_buf(),
            source,
        })
}

/// Select files under `root` on a blocking thread.
async fn select(
    root: &Path,
    patterns: Option<&crate::pattern::Patterns>,
) -> Result<Vec<PathBuf>, StageError> {
    let root = root.to_path_buf();
    let patterns = patterns.cloned();
    let files =
        tokio::task::spawn_blocking(move || crate::pattern::select_files(&root, patterns.as_ref()))
            .await??;
    Ok(files)
}

/// `"3 files"` / `"1 file"`.
fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Cache key for a file: its slash-separated relative path.
fn key(relative: &Path) -> String {
    slash_path(relative)
}
