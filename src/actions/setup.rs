//! `build:setup` and `build:clean`.
//!
//! Setup replaces the temporary tree with a fresh copy of the source tree and
//! removes the `clean_before` selection from it. Clean removes the
//! `clean_after` selection once every transforming stage has run.

use super::{RunContext, StageError, StageOutcome, count};
use crate::pattern::{Patterns, Selector};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub(super) async fn setup(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let src = ctx.src().to_path_buf();
    let build = ctx.build().to_path_buf();
    let skip = vec![build.clone(), ctx.config.dist_path.clone()];
    let clean_before = ctx.config.clean_before.clone();

    let (copied, removed) = tokio::task::spawn_blocking(move || {
        if !src.is_dir() {
            return Err(StageError::Failed(format!(
                "source directory {} does not exist",
                src.display()
            )));
        }
        remove_dir_if_exists(&build)?;
        let copied = copy_tree(&src, &build, &skip)?;
        let removed = remove_selected(&build, &clean_before)?;
        Ok((copied, removed))
    })
    .await??;

    tracing::debug!(copied, removed, "temporary tree ready");
    Ok(StageOutcome::Completed(Some(format!(
        "{} copied, {} removed",
        count(copied, "file"),
        removed
    ))))
}

pub(super) async fn clean(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let build = ctx.build().to_path_buf();
    let clean_after = ctx.config.clean_after.clone();
    let removed =
        tokio::task::spawn_blocking(move || remove_selected(&build, &clean_after)).await??;
    Ok(StageOutcome::Completed(Some(format!("{removed} removed"))))
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Copy `src` into `dst`, skipping any directory in `skip` (output trees
/// nested inside the source tree). Returns the number of files copied.
fn copy_tree(src: &Path, dst: &Path, skip: &[PathBuf]) -> Result<usize, StageError> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    let mut walker = WalkDir::new(src).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| {
            StageError::Failed(format!("failed to walk {}: {e}", src.display()))
        })?;
        if entry.file_type().is_dir() && skip.iter().any(|s| same_path(entry.path(), s)) {
            walker.skip_current_dir();
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|source| StageError::File {
                path: entry.path().to_path_buf(),
                source,
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Remove files and directories under `root` matching `patterns`. Returns
/// the number of entries removed.
pub fn remove_selected(root: &Path, patterns: &Patterns) -> Result<usize, StageError> {
    let entries = Selector::new(root, Some(patterns))?.entries()?;
    let mut removed = 0;
    for relative in entries {
        let path = root.join(&relative);
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            // Already gone with a removed parent directory.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(StageError::File { path, source }),
        }
    }
    Ok(removed)
}
