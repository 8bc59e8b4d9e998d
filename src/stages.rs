//! The fixed, ordered stage table.
//!
//! Every build walks the same table. A stage with a predicate runs only when
//! the configuration value under that key is truthy; stages without one
//! (`build:setup`, `build:clean`) always run. Configuration never reorders
//! stages, it only removes them.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    ValidateJs,
    LintJs,
    LintSass,
    Setup,
    Templates,
    Sass,
    CollectAssets,
    MinifyJs,
    MinifyHtml,
    CleanCss,
    MinifyCss,
    Sitemap,
    Browserconfig,
    GenerateImages,
    OptimizeImages,
    Revision,
    Clean,
    ValidateHtml,
    Report,
}

/// One row of the stage table.
#[derive(Debug, Clone, Copy)]
pub struct StageDef {
    pub id: StageId,
    pub name: &'static str,
    /// Configuration key gating the stage, `None` for always-on stages.
    pub predicate: Option<&'static str>,
}

const fn stage(id: StageId, name: &'static str, predicate: Option<&'static str>) -> StageDef {
    StageDef {
        id,
        name,
        predicate,
    }
}

pub const STAGE_TABLE: &[StageDef] = &[
    stage(StageId::ValidateJs, "pre-build:validate-js", Some("validate_js")),
    stage(StageId::LintJs, "pre-build:lint-js", Some("lint_js")),
    stage(StageId::LintSass, "pre-build:lint-sass", Some("lint_sass")),
    stage(StageId::Setup, "build:setup", None),
    stage(StageId::Templates, "build:templates", Some("templates")),
    stage(StageId::Sass, "build:sass", Some("sass")),
    stage(StageId::CollectAssets, "build:collect-assets", Some("collect_assets")),
    stage(StageId::MinifyJs, "build:minify-js", Some("minify_js")),
    stage(StageId::MinifyHtml, "build:minify-html", Some("minify_html")),
    stage(StageId::CleanCss, "build:clean-css", Some("clean_css")),
    stage(StageId::MinifyCss, "build:minify-css", Some("minify_css")),
    stage(StageId::Sitemap, "build:sitemap", Some("sitemap")),
    stage(StageId::Browserconfig, "build:browserconfig", Some("browserconfig")),
    stage(StageId::GenerateImages, "build:generate-images", Some("generate_images")),
    stage(StageId::OptimizeImages, "build:optimize-images", Some("optimize_images")),
    stage(StageId::Revision, "build:revision", Some("revision")),
    stage(StageId::Clean, "build:clean", None),
    stage(StageId::ValidateHtml, "post-build:validate-html", Some("validate_html")),
    stage(StageId::Report, "post-build:report", Some("report")),
];

impl StageId {
    pub fn def(self) -> &'static StageDef {
        // The table holds every variant in declaration order.
        &STAGE_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    pub fn predicate(self) -> Option<&'static str> {
        self.def().predicate
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Truthiness of a gating value: non-null object, non-empty array, `true`,
/// non-empty string, or non-zero number.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// The effective stage list for a configuration document.
pub fn resolve(config: &Value) -> Vec<StageId> {
    STAGE_TABLE
        .iter()
        .filter(|def| match def.predicate {
            None => true,
            Some(key) => config.get(key).is_some_and(is_truthy),
        })
        .map(|def| def.id)
        .collect()
}
