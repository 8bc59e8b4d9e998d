//! `build:revision`: fingerprint the selected files of the build tree.

use super::{RunContext, StageError, StageOutcome, count, read, select, slot, write};
use crate::pattern::slash_path;
use crate::revision::{Artifact, revise};
use crate::stages::StageId;

pub(super) async fn revision(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.revision, StageId::Revision)?.clone();
    let build = ctx.build().to_path_buf();

    let mut artifacts = Vec::new();
    for relative in select(&build, Some(&stage.files)).await? {
        let content = read(&build.join(&relative)).await?;
        artifacts.push(Artifact::new(slash_path(&relative), content));
    }
    let originals: Vec<(String, Vec<u8>)> = artifacts
        .iter()
        .map(|a| (a.path.clone(), a.content.clone()))
        .collect();

    let options = stage.options.clone();
    let revised = tokio::task::spawn_blocking(move || revise(artifacts, &options)).await?;

    for reference in &revised.unresolved {
        // Files outside the selection still exist in the tree.
        if !build.join(&reference.resolved).exists() {
            tracing::warn!(
                file = %reference.file,
                reference = %reference.reference,
                "unresolved reference left unchanged"
            );
        }
    }

    let mut written = 0;
    for artifact in &revised.artifacts {
        let unchanged = originals
            .iter()
            .any(|(path, content)| *path == artifact.path && *content == artifact.content);
        if !unchanged {
            write(&build.join(&artifact.path), &artifact.content).await?;
            written += 1;
        }
    }
    for orphan in &revised.orphans {
        let path = build.join(orphan);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| StageError::File { path, source })?;
    }

    let renamed = revised.renamed().count();
    tracing::debug!(written, orphans = revised.orphans.len(), "revision applied");
    Ok(StageOutcome::Completed(Some(format!(
        "{} renamed",
        count(renamed, "file")
    ))))
}
