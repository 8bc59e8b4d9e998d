//! Image stages: `build:generate-images` and `build:optimize-images`.
//!
//! Both run on a blocking task and fan out over rayon; variants and files are
//! independent of each other.

use super::{RunContext, StageError, StageOutcome, count, key, select, slot};
use crate::cache::{StageCache, hash_bytes};
use crate::config::ImageSet;
use crate::stages::StageId;
use crate::tools::{ImageTool, ToolError};
use rayon::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static WIDTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*width\s*\}\}").expect("width pattern must compile"));

static HEIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*height\s*\}\}").expect("height pattern must compile"));

/// One variant to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub source: PathBuf,
    pub target: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Target path of one size of a set, relative to the tree root.
pub fn variant_path(target: &str, width: u32, height: u32) -> String {
    let with_width = WIDTH.replace_all(target, width.to_string());
    HEIGHT.replace_all(&with_width, height.to_string()).into_owned()
}

/// Jobs for every variant whose target does not exist yet.
fn plan(root: &Path, sets: &[ImageSet]) -> Vec<ImageJob> {
    sets.iter()
        .flat_map(|set| {
            set.sizes.iter().map(move |&[width, height]| ImageJob {
                source: root.join(set.source.trim_start_matches('/')),
                target: root.join(variant_path(&set.target, width, height).trim_start_matches('/')),
                width,
                height,
            })
        })
        .filter(|job| !job.target.exists())
        .collect()
}

pub(super) async fn generate_images(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let sets = slot(&ctx.config.generate_images, StageId::GenerateImages)?.clone();
    let root = ctx.build().to_path_buf();
    let tool = Arc::clone(&ctx.tools.images);

    let generated = tokio::task::spawn_blocking(move || {
        let jobs = plan(&root, &sets);
        jobs.par_iter()
            .map(|job| {
                tracing::debug!(path = %job.target.display(), width = job.width, height = job.height, "generating image");
                tool.resize(&job.source, &job.target, job.width, job.height)
            })
            .collect::<Result<Vec<()>, ToolError>>()
            .map(|done| done.len())
    })
    .await??;

    Ok(StageOutcome::Completed(Some(format!(
        "{} generated",
        count(generated, "image")
    ))))
}

enum Optimized {
    Cached,
    Smaller,
    Kept,
}

pub(super) async fn optimize_images(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.optimize_images, StageId::OptimizeImages)?.clone();
    let root = ctx.build().to_path_buf();
    let files = select(&root, Some(&stage.files)).await?;
    let tool = Arc::clone(&ctx.tools.images);
    let cache = Arc::clone(&ctx.cache);

    let results = tokio::task::spawn_blocking(move || {
        files
            .par_iter()
            .map(|relative| optimize_one(&root, relative, tool.as_ref(), &cache))
            .collect::<Result<Vec<_>, StageError>>()
    })
    .await??;

    let mut smaller = 0;
    for result in &results {
        match result {
            Optimized::Cached => ctx.stats.hit(),
            Optimized::Smaller => {
                ctx.stats.miss();
                smaller += 1;
            }
            Optimized::Kept => ctx.stats.miss(),
        }
    }
    Ok(StageOutcome::Completed(Some(format!(
        "{smaller} of {} reduced",
        count(results.len(), "image")
    ))))
}

fn optimize_one(
    root: &Path,
    relative: &Path,
    tool: &dyn ImageTool,
    cache: &StageCache,
) -> Result<Optimized, StageError> {
    let path = root.join(relative);
    let original = std::fs::read(&path).map_err(|source| StageError::File {
        path: path.clone(),
        source,
    })?;
    let source_hash = hash_bytes(&original);
    let cache_key = key(relative);

    if let Some(entry) = cache.lookup(StageId::OptimizeImages, &cache_key, &source_hash, "") {
        if let Some(bytes) = entry.output {
            std::fs::write(&path, bytes)?;
        }
        return Ok(Optimized::Cached);
    }

    let optimized = tool.optimize(&path)?;
    if let Some(bytes) = &optimized {
        std::fs::write(&path, bytes)?;
    }
    let outcome = if optimized.is_some() {
        Optimized::Smaller
    } else {
        Optimized::Kept
    };
    cache.store(
        StageId::OptimizeImages,
        &cache_key,
        source_hash,
        String::new(),
        optimized,
    );
    Ok(outcome)
}
