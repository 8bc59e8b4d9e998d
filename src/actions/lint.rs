//! Pre-build checks: `pre-build:validate-js`, `pre-build:lint-js`,
//! `pre-build:lint-sass`.
//!
//! Checks run against the source tree. Files that passed before with the same
//! content (and the same linter config) are not checked again.

use super::{RunContext, StageError, StageOutcome, count, key, select, slot};
use crate::cache::{hash_file, hash_params};
use crate::pattern::Patterns;
use crate::stages::StageId;
use crate::tools::Linter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(super) async fn validate_js(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.validate_js, StageId::ValidateJs)?;
    let files = stage.files.clone();
    let linter = Arc::clone(&ctx.tools.validate_js);
    check(ctx, StageId::ValidateJs, linter, &files, None).await
}

pub(super) async fn lint_js(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.lint_js, StageId::LintJs)?.clone();
    let linter = Arc::clone(&ctx.tools.lint_js);
    check(ctx, StageId::LintJs, linter, &stage.files, stage.config_path.as_deref()).await
}

pub(super) async fn lint_sass(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.lint_sass, StageId::LintSass)?.clone();
    let linter = Arc::clone(&ctx.tools.lint_sass);
    check(ctx, StageId::LintSass, linter, &stage.files, stage.config_path.as_deref()).await
}

async fn check(
    ctx: &mut RunContext,
    stage: StageId,
    linter: Arc<dyn Linter>,
    patterns: &Patterns,
    config_path: Option<&Path>,
) -> Result<StageOutcome, StageError> {
    let root = ctx.src().to_path_buf();
    let files = select(&root, Some(patterns)).await?;

    // The linter config is part of the key: editing it re-checks everything.
    let config_hash = match config_path {
        Some(path) => hash_file(path).ok(),
        None => None,
    };
    let params = hash_params(&(stage.name(), config_path, config_hash));

    let mut pending: Vec<(PathBuf, String)> = Vec::new();
    for file in files {
        let source_hash = hash_file(&root.join(&file))?;
        if ctx
            .cache
            .lookup(stage, &key(&file), &source_hash, &params)
            .is_some()
        {
            ctx.stats.hit();
        } else {
            ctx.stats.miss();
            pending.push((file, source_hash));
        }
    }
    if pending.is_empty() {
        return Ok(StageOutcome::Completed(Some("nothing changed".into())));
    }

    let paths: Vec<PathBuf> = pending.iter().map(|(p, _)| p.clone()).collect();
    let report = linter.lint(&root, &paths, config_path).await?;

    let failed: HashSet<&str> = report
        .problems
        .iter()
        .flat_map(|p| p.file.split(", "))
        .collect();
    for (file, source_hash) in &pending {
        let key = key(file);
        if !failed.contains(key.as_str()) {
            ctx.cache
                .store(stage, &key, source_hash.clone(), params.clone(), None);
        }
    }
    report.fail_on_error()?;
    Ok(StageOutcome::Completed(Some(format!(
        "{} checked",
        count(pending.len(), "file")
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesStage, LintStage};
    use crate::test_helpers::{RecordingLinter, context_for, write_tree};
    use tempfile::TempDir;

    #[tokio::test]
    async fn unchanged_files_are_not_rechecked() {
        let tmp = TempDir::new().unwrap();
        let linter = Arc::new(RecordingLinter::default());
        let mut ctx = context_for(tmp.path(), |c| {
            c.validate_js = Some(FilesStage {
                files: Patterns::from("/**/*.js"),
            });
        });
        ctx.tools = Arc::new(crate::tools::Toolbox {
            validate_js: linter.clone(),
            ..(*ctx.tools).clone()
        });
        write_tree(ctx.src(), &[("a.js", "1"), ("b.js", "2"), ("c.css", "x")]);

        validate_js(&mut ctx).await.unwrap();
        assert_eq!(linter.calls(), vec![vec!["a.js", "b.js"]]);

        write_tree(ctx.src(), &[("b.js", "changed")]);
        validate_js(&mut ctx).await.unwrap();
        assert_eq!(linter.calls()[1], vec!["b.js"]);

        let outcome = validate_js(&mut ctx).await.unwrap();
        assert_eq!(outcome, StageOutcome::Completed(Some("nothing changed".into())));
        assert_eq!(linter.calls().len(), 2);
    }

    #[tokio::test]
    async fn failing_files_are_checked_again() {
        let tmp = TempDir::new().unwrap();
        let linter = Arc::new(RecordingLinter::failing(&["bad.js"]));
        let mut ctx = context_for(tmp.path(), |c| {
            c.lint_js = Some(LintStage {
                files: Patterns::from("/*.js"),
                config_path: None,
            });
        });
        ctx.tools = Arc::new(crate::tools::Toolbox {
            lint_js: linter.clone(),
            ..(*ctx.tools).clone()
        });
        write_tree(ctx.src(), &[("bad.js", "x"), ("good.js", "y")]);

        let err = lint_js(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("1 problem"));

        assert!(lint_js(&mut ctx).await.is_err());
        assert_eq!(linter.calls()[1], vec!["bad.js"]);
    }
}
