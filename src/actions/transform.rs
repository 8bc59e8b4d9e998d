//! Text-transform stages: `build:sass`, `build:minify-js`,
//! `build:minify-html`, `build:minify-css`.

use super::{RunContext, StageError, StageOutcome, count, key, read_to_string, select, slot, write};
use crate::cache::{hash_bytes, hash_params};
use crate::config::TransformStage;
use crate::stages::StageId;
use crate::tools::TextTransform;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Compile stylesheets from the source tree to `.css` files in the build
/// tree. Partials (`_name.scss`) are inputs to other stylesheets only.
pub(super) async fn sass(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.sass, StageId::Sass)?.clone();
    let src = ctx.src().to_path_buf();
    let build = ctx.build().to_path_buf();
    let files = select(&src, Some(&stage.files)).await?;
    let (partials, entries): (Vec<PathBuf>, Vec<PathBuf>) =
        files.into_iter().partition(|f| is_partial(f));

    // A partial change may affect any stylesheet.
    let mut partial_hashes = Vec::with_capacity(partials.len());
    for partial in &partials {
        let text = read_to_string(&src.join(partial)).await?;
        partial_hashes.push((key(partial), hash_bytes(text.as_bytes())));
    }
    let params = hash_params(&(&stage.options, partial_hashes));

    let tool = Arc::clone(&ctx.tools.sass);
    for relative in &entries {
        let target = build.join(relative.with_extension("css"));
        transform_file(
            ctx,
            StageId::Sass,
            tool.as_ref(),
            &stage,
            &params,
            (&src.join(relative), relative),
            &target,
        )
        .await?;
    }
    Ok(StageOutcome::Completed(Some(format!(
        "{} compiled",
        count(entries.len(), "stylesheet")
    ))))
}

/// Minify selected files of the build tree in place.
pub(super) async fn minify(ctx: &mut RunContext, stage_id: StageId) -> Result<StageOutcome, StageError> {
    let (stage, tool) = match stage_id {
        StageId::MinifyJs => (&ctx.config.minify_js, &ctx.tools.minify_js),
        StageId::MinifyHtml => (&ctx.config.minify_html, &ctx.tools.minify_html),
        StageId::MinifyCss => (&ctx.config.minify_css, &ctx.tools.minify_css),
        other => {
            return Err(StageError::Failed(format!("{other} is not a minify stage")));
        }
    };
    let stage = slot(stage, stage_id)?.clone();
    let tool = Arc::clone(tool);
    let build = ctx.build().to_path_buf();
    let params = hash_params(&stage.options);

    let files = select(&build, Some(&stage.files)).await?;
    for relative in &files {
        let path = build.join(relative);
        transform_file(
            ctx,
            stage_id,
            tool.as_ref(),
            &stage,
            &params,
            (&path, relative),
            &path,
        )
        .await?;
    }
    Ok(StageOutcome::Completed(Some(format!(
        "{} minified",
        count(files.len(), "file")
    ))))
}

/// Run one file through `tool`, reusing the cached output when the input and
/// parameters are unchanged.
async fn transform_file(
    ctx: &mut RunContext,
    stage_id: StageId,
    tool: &dyn TextTransform,
    stage: &TransformStage,
    params: &str,
    (source, relative): (&Path, &Path),
    target: &Path,
) -> Result<(), StageError> {
    let input = read_to_string(source).await?;
    let source_hash = hash_bytes(input.as_bytes());
    let cache_key = key(relative);

    if let Some(entry) = ctx.cache.lookup(stage_id, &cache_key, &source_hash, params)
        && let Some(output) = entry.output
    {
        ctx.stats.hit();
        return write(target, output).await;
    }
    ctx.stats.miss();

    let output = tool.transform(source, &input, &stage.options).await?;
    write(target, &output).await?;
    ctx.cache.store(
        stage_id,
        &cache_key,
        source_hash,
        params.to_string(),
        Some(output.into_bytes()),
    );
    Ok(())
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Patterns;
    use crate::test_helpers::{UppercaseTransform, context_for, read_tree, write_tree};
    use crate::tools::Toolbox;
    use serde_json::Map;
    use tempfile::TempDir;

    fn transform_stage(files: &str) -> Option<TransformStage> {
        Some(TransformStage {
            files: Patterns::from(files),
            options: Map::new(),
        })
    }

    #[tokio::test]
    async fn sass_writes_css_and_skips_partials() {
        let tmp = TempDir::new().unwrap();
        let upper = Arc::new(UppercaseTransform::default());
        let mut ctx = context_for(tmp.path(), |c| {
            c.sass = transform_stage("/**/*.scss");
        });
        ctx.tools = Arc::new(Toolbox {
            sass: upper.clone(),
            ..(*ctx.tools).clone()
        });
        write_tree(
            ctx.src(),
            &[("css/main.scss", "a{}"), ("css/_vars.scss", "$x: 1;")],
        );

        let outcome = sass(&mut ctx).await.unwrap();

        let out = read_tree(ctx.build());
        assert_eq!(out.keys().cloned().collect::<Vec<_>>(), vec!["css/main.css"]);
        assert_eq!(out["css/main.css"], "A{}");
        assert_eq!(outcome, StageOutcome::Completed(Some("1 stylesheet compiled".into())));
    }

    #[tokio::test]
    async fn partial_change_recompiles() {
        let tmp = TempDir::new().unwrap();
        let upper = Arc::new(UppercaseTransform::default());
        let mut ctx = context_for(tmp.path(), |c| {
            c.sass = transform_stage("/*.scss");
        });
        ctx.tools = Arc::new(Toolbox {
            sass: upper.clone(),
            ..(*ctx.tools).clone()
        });
        write_tree(ctx.src(), &[("main.scss", "a{}"), ("_vars.scss", "1")]);

        sass(&mut ctx).await.unwrap();
        sass(&mut ctx).await.unwrap();
        assert_eq!(upper.calls(), 1);

        write_tree(ctx.src(), &[("_vars.scss", "2")]);
        sass(&mut ctx).await.unwrap();
        assert_eq!(upper.calls(), 2);
    }

    #[tokio::test]
    async fn minify_rewrites_in_place_and_caches() {
        let tmp = TempDir::new().unwrap();
        let upper = Arc::new(UppercaseTransform::default());
        let mut ctx = context_for(tmp.path(), |c| {
            c.minify_js = transform_stage("/**/*.js");
        });
        ctx.tools = Arc::new(Toolbox {
            minify_js: upper.clone(),
            ..(*ctx.tools).clone()
        });
        write_tree(ctx.build(), &[("js/app.js", "let a"), ("index.html", "<p>")]);

        minify(&mut ctx, StageId::MinifyJs).await.unwrap();
        assert_eq!(read_tree(ctx.build())["js/app.js"], "LET A");

        // Fresh copy of the same input: served from the cache.
        write_tree(ctx.build(), &[("js/app.js", "let a")]);
        minify(&mut ctx, StageId::MinifyJs).await.unwrap();
        assert_eq!(read_tree(ctx.build())["js/app.js"], "LET A");
        assert_eq!(upper.calls(), 1);
        assert_eq!(ctx.stats.hits, 1);
    }

    #[tokio::test]
    async fn builtin_css_minifier() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context_for(tmp.path(), |c| {
            c.minify_css = transform_stage("/*.css");
        });
        write_tree(ctx.build(), &[("a.css", "a {\n  color: red;\n}\n")]);

        minify(&mut ctx, StageId::MinifyCss).await.unwrap();
        assert_eq!(read_tree(ctx.build())["a.css"], "a{color:red}");
    }

    #[tokio::test]
    async fn minify_rejects_other_stages() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context_for(tmp.path(), |_| {});
        assert!(minify(&mut ctx, StageId::Sass).await.is_err());
    }
}
