//! Build configuration.
//!
//! Handles loading, validating, and merging the `drudge.toml` (or
//! `drudge.json`) file. The user file is sparse: it is deep-merged over the
//! stock defaults, the merged document is checked against
//! [`schema::BUILD_CONFIG`](crate::schema::BUILD_CONFIG), and the result is
//! deserialized into [`BuildConfig`], which rejects unknown keys.
//!
//! ## Stage slots
//!
//! Every optional stage has a slot. An absent or `null` slot disables the
//! stage; a table enables it:
//!
//! ```toml
//! src_path = "./src"
//! build_path = "./build"
//! dist_path = "./dist"
//! report = true
//!
//! [templates]
//! files = ["/**/*.html", "!/templates/**"]
//! context_id = ".ctx"
//!
//! [revision]
//! files = "/**/*"
//!
//! [revision.options]
//! dont_rename = [".html", ".xml", ".json", ".txt"]
//! ```
//!
//! Relative directory paths are resolved against the directory holding the
//! configuration file.

use crate::pattern::Patterns;
use crate::revision::RevisionOptions;
use crate::schema::{self, SchemaError};
use crate::stages::{self, StageId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// File names probed, in order, when no explicit config path is given.
pub const CONFIG_FILENAMES: &[&str] = &["drudge.toml", "drudge.json"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration. Immutable for the lifetime of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Source tree, never modified by a build.
    pub src_path: PathBuf,
    /// Temporary tree every stage works in.
    pub build_path: PathBuf,
    /// Final tree, replaced only when a build succeeds.
    pub dist_path: PathBuf,
    pub validate_js: Option<FilesStage>,
    pub lint_js: Option<LintStage>,
    pub lint_sass: Option<LintStage>,
    pub templates: Option<TemplatesStage>,
    pub sass: Option<TransformStage>,
    pub collect_assets: Option<FilesStage>,
    pub minify_js: Option<TransformStage>,
    pub minify_html: Option<TransformStage>,
    pub clean_css: Option<CleanCssStage>,
    pub minify_css: Option<TransformStage>,
    pub sitemap: Option<SitemapStage>,
    pub browserconfig: Option<BrowserconfigStage>,
    pub generate_images: Option<Vec<ImageSet>>,
    pub optimize_images: Option<TransformStage>,
    pub revision: Option<RevisionStage>,
    pub validate_html: Option<ValidateHtmlStage>,
    /// Print a size report of the output.
    pub report: bool,
    /// Removed from the build tree right after it is cloned from the source.
    pub clean_before: Patterns,
    /// Removed from the build tree after revisioning.
    pub clean_after: Patterns,
    pub server: ServerConfig,
    pub tools: ToolsConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            src_path: PathBuf::from("./src"),
            build_path: PathBuf::from("./build"),
            dist_path: PathBuf::from("./dist"),
            validate_js: None,
            lint_js: None,
            lint_sass: None,
            templates: None,
            sass: None,
            collect_assets: None,
            minify_js: None,
            minify_html: None,
            clean_css: None,
            minify_css: None,
            sitemap: None,
            browserconfig: None,
            generate_images: None,
            optimize_images: None,
            revision: None,
            validate_html: None,
            report: false,
            clean_before: Patterns::Many(Vec::new()),
            clean_after: Patterns::Many(Vec::new()),
            server: ServerConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Validate values the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, path) in [
            ("src_path", &self.src_path),
            ("build_path", &self.build_path),
            ("dist_path", &self.dist_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!("{key} must not be empty")));
            }
        }
        let trees = [
            ("src_path", normalized(&self.src_path)),
            ("build_path", normalized(&self.build_path)),
            ("dist_path", normalized(&self.dist_path)),
        ];
        for (i, (a, a_path)) in trees.iter().enumerate() {
            for (b, b_path) in &trees[i + 1..] {
                if a_path.starts_with(b_path) || b_path.starts_with(a_path) {
                    return Err(ConfigError::Validation(format!(
                        "{a} and {b} must not be the same directory or nested in each other"
                    )));
                }
            }
        }
        if let Some(revision) = &self.revision {
            let len = revision.options.hash_length;
            if !(4..=64).contains(&len) {
                return Err(ConfigError::Validation(
                    "revision.options.hash_length must be 4-64".into(),
                ));
            }
        }
        for set in self.generate_images.iter().flatten() {
            if set.sizes.iter().any(|[w, h]| *w == 0 || *h == 0) {
                return Err(ConfigError::Validation(format!(
                    "generate_images sizes for {} must be non-zero",
                    set.source
                )));
            }
        }
        Ok(())
    }

    /// The configuration as a raw document, the form stage predicates read.
    pub fn to_document(&self) -> Result<Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The effective stage list for this configuration.
    pub fn stages(&self) -> Result<Vec<StageId>, ConfigError> {
        Ok(stages::resolve(&self.to_document()?))
    }

    /// Resolve relative directory and linter config paths against `base`.
    pub fn rebase(&mut self, base: &Path) {
        let lint_configs = [&mut self.lint_js, &mut self.lint_sass]
            .into_iter()
            .filter_map(|stage| stage.as_mut()?.config_path.as_mut());
        for path in [
            &mut self.src_path,
            &mut self.build_path,
            &mut self.dist_path,
        ]
        .into_iter()
        .chain(lint_configs)
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
fn normalized(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// Stage slots
// =============================================================================

/// A stage that only selects files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesStage {
    pub files: Patterns,
}

/// A lint stage: files plus an optional linter config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LintStage {
    pub files: Patterns,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

/// A stage that passes files through a collaborator with free-form options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformStage {
    pub files: Patterns,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplatesStage {
    pub files: Patterns,
    /// Marker removed from rendered file names (`index.tpl.html` -> `index.html`).
    #[serde(default)]
    pub id: String,
    /// Suffix of per-template context files (`index.ctx.json`).
    #[serde(default = "default_context_id")]
    pub context_id: String,
    /// Data available to every template.
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    /// Markdown options; `None` disables markdown blocks.
    #[serde(default)]
    pub markdown: Option<Map<String, Value>>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

fn default_context_id() -> String {
    ".ctx".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanCssStage {
    pub files: Patterns,
    #[serde(default)]
    pub options: CleanCssOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanCssOptions {
    /// Markup scanned for used selectors, relative to the build tree.
    pub html: Option<Patterns>,
    /// Selectors that are always kept.
    pub ignore: Option<Vec<String>>,
}

impl Default for CleanCssOptions {
    fn default() -> Self {
        Self {
            html: Some(Patterns::One("/**/*.html".into())),
            ignore: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitemapStage {
    pub files: Patterns,
    pub options: SitemapOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitemapOptions {
    pub site_url: String,
    #[serde(default)]
    pub changefreq: Option<String>,
    #[serde(default)]
    pub priority: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserconfigStage {
    pub tile70x70: String,
    pub tile150x150: String,
    pub tile310x150: String,
    pub tile310x310: String,
    pub tile_color: String,
}

/// A source image and the sizes to derive from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSet {
    pub source: String,
    pub sizes: Vec<[u32; 2]>,
    /// Target path with `{{ width }}` and `{{ height }}` placeholders.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevisionStage {
    pub files: Patterns,
    #[serde(default)]
    pub options: RevisionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateHtmlStage {
    pub files: Patterns,
    #[serde(default)]
    pub options: ValidateHtmlOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidateHtmlOptions {
    /// Fail the build when the validator reports errors.
    pub strict: bool,
    pub endpoint: String,
}

impl Default for ValidateHtmlOptions {
    fn default() -> Self {
        Self {
            strict: false,
            endpoint: "https://validator.w3.org/nu/".to_string(),
        }
    }
}

// =============================================================================
// Server and external tools
// =============================================================================

/// Development server settings for `drudge serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub live_reload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            live_reload: true,
        }
    }
}

/// Command lines of the external programs behind the command-backed stages.
///
/// Text transforms receive the file on stdin and print the result; linters
/// receive file paths as trailing arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub sass: Vec<String>,
    pub minify_js: Vec<String>,
    pub validate_js: Vec<String>,
    pub lint_js: Vec<String>,
    pub lint_sass: Vec<String>,
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sass: command(&["sass", "--stdin"]),
            minify_js: command(&["terser", "--compress", "--mangle"]),
            validate_js: command(&["node", "--check"]),
            lint_js: command(&["eslint"]),
            lint_sass: command(&["stylelint"]),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock defaults as a raw document, every stage slot `null`.
pub fn stock_defaults_value() -> Result<Value, ConfigError> {
    BuildConfig::default().to_document()
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Objects are merged key-by-key (overlay keys override base keys).
/// - Any other overlay value replaces the base value, `null` included.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => merge_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load a configuration file as a raw document. `.json` files are parsed as
/// JSON, everything else as TOML.
pub fn load_raw_config(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        let value: toml::Value = toml::from_str(&content)?;
        Ok(serde_json::to_value(value)?)
    }
}

/// Find the first known configuration file in `dir`.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Merge an optional overlay onto a base document, then schema-check,
/// deserialize, and validate.
pub fn resolve_config(base: Value, overlay: Option<Value>) -> Result<BuildConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_values(base, ov),
        None => base,
    };
    schema::validate(schema::BUILD_CONFIG, &merged)?;
    let config: BuildConfig = serde_json::from_value(merged)?;
    config.validate()?;
    Ok(config)
}

/// Load the build configuration.
///
/// With an explicit `path` the file must exist. Otherwise `dir` is probed for
/// [`CONFIG_FILENAMES`] and stock defaults are used when none is found.
/// Directory paths are rebased onto the config file's directory (or `dir`).
pub fn load_config(path: Option<&Path>, dir: &Path) -> Result<BuildConfig, ConfigError> {
    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(dir),
    };
    let overlay = file.as_deref().map(load_raw_config).transpose()?;
    let mut config = resolve_config(stock_defaults_value()?, overlay)?;
    let base = file
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(dir);
    config.rebase(base);
    Ok(config)
}

/// Returns a fully-commented stock `drudge.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Drudge Configuration
# ====================
# Every stage below is disabled until its table is uncommented.
# Patterns are globs relative to the tree the stage works on; a leading "!"
# excludes. Unknown keys will cause an error.

# Source tree (never modified), temporary build tree, and final output tree.
# Relative paths are resolved against the directory of this file.
src_path = "./src"
build_path = "./build"
dist_path = "./dist"

# Print a size report of the output after each build.
report = false

# Removed from the build tree right after cloning the source tree.
clean_before = []

# Removed from the build tree after revisioning (e.g. template partials).
clean_after = []

# ---------------------------------------------------------------------------
# Pre-build checks (run against the source tree)
# ---------------------------------------------------------------------------
# [validate_js]
# files = ["/**/*.js"]

# [lint_js]
# files = ["/js/**/*.js"]
# config_path = "./.eslintrc.json"

# [lint_sass]
# files = ["/**/*.scss"]
# config_path = "./.stylelintrc.json"

# ---------------------------------------------------------------------------
# Build stages
# ---------------------------------------------------------------------------
# Render templates from the source tree into the build tree.
# [templates]
# files = ["/**/*.html"]
# id = ""              # removed from output names: index.tpl.html -> index.html
# context_id = ".ctx"  # index.html reads index.ctx.json
# [templates.data]
# title = "My site"
# [templates.markdown]
# tables = true

# Compile stylesheets from the source tree to .css files in the build tree.
# [sass]
# files = ["/**/*.scss", "!/**/_*.scss"]

# Concatenate assets between <!-- build:js /js/all.js --> and <!-- endbuild -->.
# [collect_assets]
# files = ["/**/*.html"]

# [minify_js]
# files = ["/**/*.js"]

# [minify_html]
# files = ["/**/*.html"]

# Drop stylesheet rules whose selectors never appear in the markup.
# [clean_css]
# files = ["/**/*.css"]
# [clean_css.options]
# html = ["/**/*.html"]
# ignore = [".is-open"]

# [minify_css]
# files = ["/**/*.css"]

# [sitemap]
# files = ["/**/*.html"]
# [sitemap.options]
# site_url = "https://example.com"
# changefreq = "weekly"
# priority = 0.5

# [browserconfig]
# tile70x70 = "/img/tile-70x70.png"
# tile150x150 = "/img/tile-150x150.png"
# tile310x150 = "/img/tile-310x150.png"
# tile310x310 = "/img/tile-310x310.png"
# tile_color = "#ffffff"

# [[generate_images]]
# source = "/img/templates/tile.png"
# sizes = [[70, 70], [150, 150], [310, 310]]
# target = "/img/tile-{{ width }}x{{ height }}.png"

# [optimize_images]
# files = ["/**/*.{png,jpg,jpeg,gif}"]

# Fingerprint file names and rewrite every reference to them.
# [revision]
# files = ["/**/*"]
# [revision.options]
# dont_rename = [".html", ".xml", ".json", ".txt"]
# hash_length = 8
# mode = "rename"      # or "query" to append ?v=<hash> instead
# query_param = "v"

# ---------------------------------------------------------------------------
# Post-build checks (skipped when offline)
# ---------------------------------------------------------------------------
# [validate_html]
# files = ["/**/*.html"]
# [validate_html.options]
# strict = false
# endpoint = "https://validator.w3.org/nu/"

# ---------------------------------------------------------------------------
# Development server (drudge serve)
# ---------------------------------------------------------------------------
[server]
host = "127.0.0.1"
port = 3000
live_reload = true

# ---------------------------------------------------------------------------
# External programs
# ---------------------------------------------------------------------------
[tools]
sass = ["sass", "--stdin"]
minify_js = ["terser", "--compress", "--mangle"]
validate_js = ["node", "--check"]
lint_js = ["eslint"]
lint_sass = ["stylelint"]
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevisionMode;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn default_config_paths() {
        let config = BuildConfig::default();
        assert_eq!(config.src_path, PathBuf::from("./src"));
        assert_eq!(config.build_path, PathBuf::from("./build"));
        assert_eq!(config.dist_path, PathBuf::from("./dist"));
        assert!(!config.report);
    }

    #[test]
    fn default_config_runs_setup_and_clean() {
        let stages = BuildConfig::default().stages().unwrap();
        assert_eq!(stages, vec![StageId::Setup, StageId::Clean]);
    }

    #[test]
    fn stock_defaults_have_null_stage_slots() {
        let doc = stock_defaults_value().unwrap();
        assert_eq!(doc["templates"], Value::Null);
        assert_eq!(doc["revision"], Value::Null);
        assert_eq!(doc["clean_after"], json!([]));
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(None, tmp.path()).unwrap();
        assert_eq!(config.src_path, tmp.path().join("./src"));
        assert!(config.templates.is_none());
    }

    #[test]
    fn load_config_reads_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("drudge.toml"),
            r#"
report = true

[templates]
files = "/**/*.html"
id = ".tpl"

[revision]
files = ["/**/*", "!/robots.txt"]

[revision.options]
mode = "query"
"#,
        )
        .unwrap();

        let config = load_config(None, tmp.path()).unwrap();
        let templates = config.templates.as_ref().unwrap();
        assert_eq!(templates.id, ".tpl");
        assert_eq!(templates.context_id, ".ctx");
        let revision = config.revision.as_ref().unwrap();
        assert_eq!(revision.options.mode, RevisionMode::Query);
        assert_eq!(revision.options.hash_length, 8);
        assert!(config.report);
        assert_eq!(
            config.stages().unwrap(),
            vec![
                StageId::Setup,
                StageId::Templates,
                StageId::Revision,
                StageId::Clean,
                StageId::Report
            ]
        );
    }

    #[test]
    fn load_config_reads_json_with_null_slots() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("site.json");
        fs::write(
            &path,
            r#"{"src_path": "content", "sass": null, "minify_css": {"files": "/**/*.css"}}"#,
        )
        .unwrap();

        let config = load_config(Some(&path), Path::new("/elsewhere")).unwrap();
        assert_eq!(config.src_path, tmp.path().join("content"));
        assert!(config.sass.is_none());
        assert!(config.minify_css.is_some());
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("drudge.toml"), "this is not valid toml [[[").unwrap();
        let result = load_config(None, tmp.path());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_explicit_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(Some(&tmp.path().join("missing.toml")), tmp.path());
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn toml_is_preferred_over_json() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("drudge.toml"), "report = true").unwrap();
        fs::write(tmp.path().join("drudge.json"), r#"{"report": false}"#).unwrap();
        assert_eq!(
            find_config(tmp.path()),
            Some(tmp.path().join("drudge.toml"))
        );
    }

    // =========================================================================
    // Schema and value validation
    // =========================================================================

    #[test]
    fn wrong_type_names_the_key() {
        let overlay = json!({"templates": {"files": 42}});
        let err = resolve_config(stock_defaults_value().unwrap(), Some(overlay)).unwrap_err();
        match err {
            ConfigError::Schema(e) => assert_eq!(e.path, "templates.files"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn missing_files_key_is_schema_error() {
        let overlay = json!({"minify_js": {"options": {}}});
        let err = resolve_config(stock_defaults_value().unwrap(), Some(overlay)).unwrap_err();
        assert!(matches!(err, ConfigError::Schema(ref e) if e.actual == "missing"));
    }

    #[test]
    fn unknown_key_rejected() {
        let overlay = json!({"templatez": {"files": "/**/*"}});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"), "{err}");
    }

    #[test]
    fn unknown_nested_key_rejected() {
        let overlay = json!({"revision": {"files": "/**/*", "options": {"hash_len": 4}}});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn build_path_must_differ_from_dist_path() {
        let overlay = json!({"build_path": "out", "dist_path": "out"});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn build_path_containing_src_path_rejected() {
        let overlay = json!({"src_path": "site/src", "build_path": "site"});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        let Err(ConfigError::Validation(message)) = result else {
            panic!("expected validation error, got {result:?}");
        };
        assert!(message.contains("src_path and build_path"), "{message}");
    }

    #[test]
    fn nested_trees_rejected() {
        for overlay in [
            json!({"build_path": "out/tmp", "dist_path": "out"}),
            json!({"build_path": "tmp", "dist_path": "tmp/dist"}),
            json!({"src_path": "site", "dist_path": "site/dist"}),
            json!({"build_path": "./out/../src/tmp"}),
            json!({"dist_path": "./src/."}),
        ] {
            let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay.clone()));
            assert!(
                matches!(result, Err(ConfigError::Validation(_))),
                "{overlay} accepted"
            );
        }
    }

    #[test]
    fn sibling_trees_with_shared_prefix_accepted() {
        let overlay = json!({"src_path": "site", "build_path": "site-build", "dist_path": "site-dist"});
        assert!(resolve_config(stock_defaults_value().unwrap(), Some(overlay)).is_ok());
    }

    #[test]
    fn rebased_config_with_nested_build_path_is_rejected() {
        let mut config = BuildConfig {
            src_path: "pages".into(),
            build_path: "..".into(),
            ..BuildConfig::default()
        };
        config.rebase(Path::new("/project/site"));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn empty_path_rejected() {
        let overlay = json!({"src_path": ""});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn hash_length_out_of_range_rejected() {
        let overlay = json!({"revision": {"files": "/**/*", "options": {"hash_length": 2}}});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_image_size_rejected() {
        let overlay = json!({"generate_images": [
            {"source": "/a.png", "sizes": [[0, 10]], "target": "/a-{{ width }}.png"}
        ]});
        let result = resolve_config(stock_defaults_value().unwrap(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // merge_values tests
    // =========================================================================

    #[test]
    fn merge_scalar_override() {
        let merged = merge_values(json!({"report": false}), json!({"report": true}));
        assert_eq!(merged["report"], json!(true));
    }

    #[test]
    fn merge_null_over_object_disables() {
        let merged = merge_values(json!({"sass": {"files": "/a"}}), json!({"sass": null}));
        assert_eq!(merged["sass"], Value::Null);
    }

    #[test]
    fn merge_deep_nested() {
        let base = json!({"server": {"host": "127.0.0.1", "port": 3000}});
        let overlay = json!({"server": {"port": 8080}});
        let merged = merge_values(base, overlay);
        assert_eq!(merged["server"]["host"], json!("127.0.0.1"));
        assert_eq!(merged["server"]["port"], json!(8080));
    }

    #[test]
    fn merge_arrays_replace() {
        let merged = merge_values(json!({"a": [1, 2, 3]}), json!({"a": [4]}));
        assert_eq!(merged["a"], json!([4]));
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config =
            resolve_config(stock_defaults_value().unwrap(), Some(serde_json::to_value(value).unwrap()))
                .unwrap();
        assert_eq!(config, BuildConfig::default());
    }

    #[test]
    fn stock_config_toml_documents_every_stage() {
        let toml = stock_config_toml();
        for def in crate::stages::STAGE_TABLE {
            if let Some(key) = def.predicate {
                assert!(toml.contains(key), "stock config missing {key}");
            }
        }
    }
}
