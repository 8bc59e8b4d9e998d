//! `post-build:validate-html`: check markup against an online validator.
//!
//! Skipped, not failed, when the validator cannot be reached. Errors fail
//! the build only with `strict = true`.

use super::{RunContext, StageError, StageOutcome, count, read_to_string, select, slot};
use crate::pattern::slash_path;
use crate::stages::StageId;
use crate::tools::MessageKind;

pub(super) async fn validate_html(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.validate_html, StageId::ValidateHtml)?.clone();
    let validator = std::sync::Arc::clone(&ctx.tools.markup_validator);
    if !validator.is_available().await {
        tracing::info!(endpoint = %stage.options.endpoint, "validator unreachable, skipping");
        return Ok(StageOutcome::Unavailable("no connection to validator".into()));
    }

    let build = ctx.build().to_path_buf();
    let files = select(&build, Some(&stage.files)).await?;
    let mut errors = 0;
    let mut warnings = 0;
    for relative in &files {
        let name = slash_path(relative);
        let html = read_to_string(&build.join(relative)).await?;
        for message in validator.validate(&name, &html).await? {
            let line = message.line.map(|l| l.to_string()).unwrap_or_default();
            match message.kind {
                MessageKind::Error => {
                    errors += 1;
                    tracing::error!(file = %name, line = %line, "{}", message.message);
                }
                MessageKind::Warning => {
                    warnings += 1;
                    tracing::warn!(file = %name, line = %line, "{}", message.message);
                }
                MessageKind::Info => {
                    tracing::debug!(file = %name, line = %line, "{}", message.message);
                }
            }
        }
    }

    if errors > 0 && stage.options.strict {
        return Err(StageError::Failed(format!(
            "markup validation found {}",
            count(errors, "error")
        )));
    }
    Ok(StageOutcome::Completed(Some(format!(
        "{} checked, {}, {}",
        count(files.len(), "file"),
        count(errors, "error"),
        count(warnings, "warning")
    ))))
}
