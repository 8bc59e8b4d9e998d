//! File selection patterns.
//!
//! Stages select their inputs with glob patterns written relative to a tree
//! root. A pattern may be a single string or a list, and any entry starting
//! with `!` excludes what it matches:
//!
//! ```toml
//! [minify_js]
//! files = ["/**/*.js", "!/vendor/**"]
//! ```
//!
//! Selection happens in two steps. [`expand`] is a pure string operation that
//! anchors every pattern at a root, keeping the `!` in front:
//!
//! ```text
//! expand("build", "!/x/*.js")  ->  ["!build/x/*.js"]
//! ```
//!
//! [`Selector`] then compiles the expanded patterns with `globset` and walks
//! the root with `walkdir`, keeping entries that match at least one positive
//! pattern and no negative one. `*` never crosses a `/`; use `**` for that.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("invalid pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// One pattern or a list of patterns, as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            Patterns::One(p) => std::slice::from_ref(p),
            Patterns::Many(list) => list,
        };
        items.iter().map(String::as_str)
    }
}

impl From<&str> for Patterns {
    fn from(pattern: &str) -> Self {
        Patterns::One(pattern.to_string())
    }
}

impl From<Vec<&str>> for Patterns {
    fn from(patterns: Vec<&str>) -> Self {
        Patterns::Many(patterns.into_iter().map(String::from).collect())
    }
}

/// Anchor every pattern at `root`, joining with exactly one `/`.
///
/// A leading `!` stays first. `None` selects nothing.
pub fn expand(root: &str, patterns: Option<&Patterns>) -> Vec<String> {
    let Some(patterns) = patterns else {
        return Vec::new();
    };
    let root = root.trim_end_matches('/');
    patterns
        .iter()
        .map(|pattern| match pattern.strip_prefix('!') {
            Some(negated) => format!("!{}", join(root, negated)),
            None => join(root, pattern),
        })
        .collect()
}

fn join(root: &str, pattern: &str) -> String {
    format!("{}/{}", root, pattern.trim_start_matches('/'))
}

/// Slash-separated form of a path, used both for roots and relative entries.
pub fn slash_path(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    match text.trim_end_matches('/') {
        "" if text.starts_with('/') => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Compiled include/exclude sets for one root.
#[derive(Debug)]
pub struct Selector {
    root: PathBuf,
    prefix: String,
    include: GlobSet,
    exclude: GlobSet,
}

impl Selector {
    pub fn new(root: &Path, patterns: Option<&Patterns>) -> Result<Self, PatternError> {
        let prefix = slash_path(root);
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        for pattern in expand(&prefix, patterns) {
            let (builder, glob) = match pattern.strip_prefix('!') {
                Some(negated) => (&mut exclude, negated.to_string()),
                None => (&mut include, pattern),
            };
            builder.add(GlobBuilder::new(&glob).literal_separator(true).build()?);
        }
        Ok(Self {
            root: root.to_path_buf(),
            prefix,
            include: include.build()?,
            exclude: exclude.build()?,
        })
    }

    /// Test a root-relative, slash-separated path.
    pub fn is_match(&self, relative: &str) -> bool {
        let full = format!("{}/{}", self.prefix, relative.trim_start_matches('/'));
        self.include.is_match(&full) && !self.exclude.is_match(&full)
    }

    /// Matching files, as sorted root-relative paths.
    pub fn files(&self) -> Result<Vec<PathBuf>, PatternError> {
        self.walk(true)
    }

    /// Matching files and directories, as sorted root-relative paths.
    pub fn entries(&self) -> Result<Vec<PathBuf>, PatternError> {
        self.walk(false)
    }

    fn walk(&self, files_only: bool) -> Result<Vec<PathBuf>, PatternError> {
        if self.include.is_empty() || !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut selected = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|source| PatternError::Walk {
                path: self.root.clone(),
                source,
            })?;
            if files_only && !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if self.is_match(&slash_path(relative)) {
                selected.push(relative.to_path_buf());
            }
        }
        Ok(selected)
    }
}

/// Select matching files under `root`.
pub fn select_files(root: &Path, patterns: Option<&Patterns>) -> Result<Vec<PathBuf>, PatternError> {
    Selector::new(root, patterns)?.files()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_tree;
    use tempfile::TempDir;

    // =========================================================================
    // expand
    // =========================================================================

    #[test]
    fn expand_single_string() {
        assert_eq!(
            expand("build", Some(&"/**/*.js".into())),
            vec!["build/**/*.js"]
        );
    }

    #[test]
    fn expand_keeps_negation_first() {
        assert_eq!(expand("build", Some(&"!/x/*.js".into())), vec!["!build/x/*.js"]);
    }

    #[test]
    fn expand_list_elementwise() {
        let patterns: Patterns = vec!["/**/*.css", "!/vendor/**", "img/*.png"].into();
        assert_eq!(
            expand("./dist/", Some(&patterns)),
            vec!["./dist/**/*.css", "!./dist/vendor/**", "./dist/img/*.png"]
        );
    }

    #[test]
    fn expand_none_selects_nothing() {
        assert!(expand("build", None).is_empty());
        assert!(expand("build", Some(&Patterns::Many(vec![]))).is_empty());
    }

    #[test]
    fn patterns_deserialize_from_string_or_list() {
        let one: Patterns = serde_json::from_str(r#""/**/*""#).unwrap();
        let many: Patterns = serde_json::from_str(r#"["/a", "!/b"]"#).unwrap();
        assert_eq!(one, Patterns::One("/**/*".into()));
        assert_eq!(many.iter().collect::<Vec<_>>(), vec!["/a", "!/b"]);
    }

    // =========================================================================
    // Selector
    // =========================================================================

    #[test]
    fn selector_includes_and_excludes() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("js/app.js", "a"),
                ("js/vendor/lib.js", "b"),
                ("css/main.css", "c"),
            ],
        );
        let patterns: Patterns = vec!["/**/*.js", "!/js/vendor/**"].into();
        let files = select_files(tmp.path(), Some(&patterns)).unwrap();
        assert_eq!(files, vec![PathBuf::from("js/app.js")]);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.html", ""), ("sub/b.html", "")]);
        let files = select_files(tmp.path(), Some(&"/*.html".into())).unwrap();
        assert_eq!(files, vec![PathBuf::from("a.html")]);
    }

    #[test]
    fn double_star_matches_root_level_files() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.html", ""), ("sub/b.html", "")]);
        let files = select_files(tmp.path(), Some(&"/**/*.html".into())).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("a.html"), PathBuf::from("sub/b.html")]
        );
    }

    #[test]
    fn entries_include_directories() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("templates/base.html", ""), ("index.html", "")]);
        let selector = Selector::new(tmp.path(), Some(&"/templates".into())).unwrap();
        assert_eq!(selector.entries().unwrap(), vec![PathBuf::from("templates")]);
        assert!(selector.files().unwrap().is_empty());
    }

    #[test]
    fn missing_root_selects_nothing() {
        let tmp = TempDir::new().unwrap();
        let files = select_files(&tmp.path().join("nope"), Some(&"/**/*".into())).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn only_negations_select_nothing() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.js", "")]);
        let files = select_files(tmp.path(), Some(&"!/a.js".into())).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn invalid_glob_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = Selector::new(tmp.path(), Some(&"/a[".into()));
        assert!(matches!(result, Err(PatternError::Glob(_))));
    }
}
