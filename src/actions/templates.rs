//! `build:templates`: render templates from the source tree into the build
//! tree.
//!
//! Each template sees the stage's `data` merged with its own context file,
//! `<stem><context_id>.json` next to it (`about.html` reads `about.ctx.json`).
//! The template `id` marker is removed from output names.

use super::{RunContext, StageError, StageOutcome, count, key, read_to_string, select, slot, write};
use crate::cache::{hash_bytes, hash_params};
use crate::config::TemplatesStage;
use crate::stages::StageId;
use crate::tools::TemplateJob;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub(super) async fn render_templates(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.templates, StageId::Templates)?.clone();
    let src = ctx.src().to_path_buf();
    let build = ctx.build().to_path_buf();
    let params = hash_params(&(&stage.data, &stage.markdown, &stage.options));

    let files = select(&src, Some(&stage.files)).await?;
    let mut rendered = 0;
    for relative in &files {
        let source = read_to_string(&src.join(relative)).await?;
        let context_path = context_file(&src.join(relative), &stage.context_id);
        let context_text = match tokio::fs::read_to_string(&context_path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(StageError::File {
                    path: context_path,
                    source,
                });
            }
        };
        let source_hash = hash_bytes(
            format!("{source}\0{}", context_text.as_deref().unwrap_or_default()).as_bytes(),
        );
        let target = build.join(output_path(relative, &stage.id));
        let cache_key = key(relative);

        if let Some(entry) = ctx
            .cache
            .lookup(StageId::Templates, &cache_key, &source_hash, &params)
            && let Some(output) = entry.output
        {
            ctx.stats.hit();
            write(&target, output).await?;
            continue;
        }
        ctx.stats.miss();

        let local = match context_text {
            Some(text) => parse_context(&context_path, &text)?,
            None => Map::new(),
        };
        let job = TemplateJob {
            relative_path: cache_key.clone(),
            source,
            context: merged_context(&stage, local),
            markdown: stage.markdown.clone().unwrap_or_default(),
            options: stage.options.clone(),
        };
        let html = ctx.tools.renderer.render(&job).await?;
        write(&target, &html).await?;
        ctx.cache.store(
            StageId::Templates,
            &cache_key,
            source_hash,
            params.clone(),
            Some(html.into_bytes()),
        );
        rendered += 1;
    }
    tracing::debug!(rendered, total = files.len(), "templates rendered");
    Ok(StageOutcome::Completed(Some(format!(
        "{} rendered",
        count(files.len(), "template")
    ))))
}

/// `dir/about.html` with `.ctx` -> `dir/about.ctx.json`.
fn context_file(template: &Path, context_id: &str) -> PathBuf {
    let stem = template
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    template.with_file_name(format!("{stem}{context_id}.json"))
}

/// Output path with the first occurrence of `id` removed from the file stem.
fn output_path(relative: &Path, id: &str) -> PathBuf {
    if id.is_empty() {
        return relative.to_path_buf();
    }
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match relative.extension() {
        Some(ext) => format!("{}.{}", stem.replacen(id, "", 1), ext.to_string_lossy()),
        None => stem.replacen(id, "", 1),
    };
    relative.with_file_name(name)
}

fn parse_context(path: &Path, text: &str) -> Result<Map<String, Value>, StageError> {
    let value: Value = serde_json::from_str(text).map_err(|source| StageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StageError::Failed(format!(
            "{}: context must be a JSON object",
            path.display()
        ))),
    }
}

/// Stage data with the template's own context on top.
fn merged_context(stage: &TemplatesStage, local: Map<String, Value>) -> Value {
    let mut context = stage.data.clone().unwrap_or_default();
    context.extend(local);
    Value::Object(context)
}
