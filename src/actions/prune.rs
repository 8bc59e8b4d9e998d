//! `build:clean-css`: drop stylesheet rules the markup never uses.

use super::{RunContext, StageError, StageOutcome, read_to_string, select, slot, write};
use crate::stages::StageId;

pub(super) async fn clean_css(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.clean_css, StageId::CleanCss)?.clone();
    let build = ctx.build().to_path_buf();

    let mut markup = Vec::new();
    for relative in select(&build, stage.options.html.as_ref()).await? {
        markup.push(read_to_string(&build.join(relative)).await?);
    }
    if markup.is_empty() {
        tracing::debug!("no markup selected, stylesheets kept as they are");
    }
    let ignore = stage.options.ignore.clone().unwrap_or_default();

    let mut removed = 0;
    for relative in select(&build, Some(&stage.files)).await? {
        let path = build.join(&relative);
        let css = read_to_string(&path).await?;
        let pruned = ctx.tools.css_pruner.prune(&css, &markup, &ignore);
        if pruned.removed > 0 {
            tracing::debug!(file = %relative.display(), removed = pruned.removed, "pruned stylesheet");
            write(&path, pruned.css).await?;
        }
        removed += pruned.removed;
    }
    Ok(StageOutcome::Completed(Some(format!(
        "{removed} unused rules removed"
    ))))
}
