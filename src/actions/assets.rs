//! `build:collect-assets`: bundle scripts and stylesheets marked in markup.
//!
//! ```html
//! <!-- build:js /js/all.js -->
//! <script src="/js/a.js"></script>
//! <script src="js/b.js"></script>
//! <!-- endbuild -->
//! ```
//!
//! The referenced files are concatenated into `/js/all.js` and the block is
//! replaced with a single `<script src="/js/all.js"></script>`. `build:css`
//! blocks work the same way with `<link href>` tags. Bundled sources stay in
//! place; `clean_after` can remove them.

use super::{RunContext, StageError, StageOutcome, count, read, read_to_string, select, slot, write};
use crate::pattern::slash_path;
use crate::revision::references::resolve;
use crate::stages::StageId;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(js|css)\s+(\S+)\s*-->(.*?)<!--\s*endbuild\s*-->")
        .expect("build block pattern must compile")
});

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("script pattern must compile")
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#)
        .expect("link pattern must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Script,
    Style,
}

/// One bundle declared by a build block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub kind: BundleKind,
    /// Tree-relative path of the bundle.
    pub target: String,
    /// Tree-relative paths of the bundled files, in block order.
    pub sources: Vec<String>,
}

/// Markup with every build block replaced, and the bundles it declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedPage {
    pub html: String,
    pub bundles: Vec<Bundle>,
}

/// Replace the build blocks of `html`, a page at tree-relative path `from`.
///
/// References inside a block that do not resolve into the tree (external
/// URLs) are dropped from the bundle.
pub fn collect_blocks(html: &str, from: &str) -> CollectedPage {
    let mut bundles = Vec::new();
    let replaced = BLOCK.replace_all(html, |caps: &Captures| {
        let (kind, tags) = match &caps[1] {
            "js" => (BundleKind::Script, &*SCRIPT_SRC),
            _ => (BundleKind::Style, &*LINK_HREF),
        };
        let written = &caps[2];
        let Some((target, _)) = resolve(from, written) else {
            tracing::warn!(page = from, bundle = written, "unresolvable bundle target, block kept");
            return caps[0].to_string();
        };
        let sources = tags
            .captures_iter(&caps[3])
            .filter_map(|c| resolve(from, &c[1]).map(|(path, _)| path))
            .collect();
        bundles.push(Bundle {
            kind,
            target,
            sources,
        });
        match kind {
            BundleKind::Script => format!(r#"<script src="{written}"></script>"#),
            BundleKind::Style => format!(r#"<link rel="stylesheet" href="{written}">"#),
        }
    });
    CollectedPage {
        html: replaced.into_owned(),
        bundles,
    }
}

pub(super) async fn collect_assets(ctx: &mut RunContext) -> Result<StageOutcome, StageError> {
    let stage = slot(&ctx.config.collect_assets, StageId::CollectAssets)?.clone();
    let build = ctx.build().to_path_buf();
    let pages = select(&build, Some(&stage.files)).await?;

    let mut bundles: BTreeMap<String, Bundle> = BTreeMap::new();
    for relative in &pages {
        let path = build.join(relative);
        let html = read_to_string(&path).await?;
        let page = collect_blocks(&html, &slash_path(relative));
        if page.bundles.is_empty() {
            continue;
        }
        write(&path, &page.html).await?;
        for bundle in page.bundles {
            if let Some(previous) = bundles.get(&bundle.target)
                && previous.sources != bundle.sources
            {
                tracing::warn!(
                    bundle = %bundle.target,
                    page = %slash_path(relative),
                    "bundle declared with different sources, last declaration wins"
                );
            }
            bundles.insert(bundle.target.clone(), bundle);
        }
    }

    for bundle in bundles.values() {
        let mut joined = Vec::new();
        for source in &bundle.sources {
            let mut bytes = read(&build.join(source)).await?;
            if !bytes.ends_with(b"\n") {
                bytes.push(b'\n');
            }
            joined.extend(bytes);
        }
        write(&build.join(&bundle.target), joined).await?;
        tracing::debug!(bundle = %bundle.target, sources = bundle.sources.len(), "bundle written");
    }
    Ok(StageOutcome::Completed(Some(format!(
        "{} written",
        count(bundles.len(), "bundle")
    ))))
}
