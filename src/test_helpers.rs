//! Shared test utilities for the drudge test suite.
//!
//! Trees are written and read as `(relative path, contents)` pairs so a test
//! states its fixture inline:
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let mut ctx = context_for(tmp.path(), |c| c.report = true);
//! write_tree(ctx.src(), &[("index.html", "<p>hi</p>")]);
//! assert_eq!(read_tree(ctx.src())["index.html"], "<p>hi</p>");
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::actions::RunContext;
use crate::cache::StageCache;
use crate::config::BuildConfig;
use crate::pattern::slash_path;
use crate::tools::{
    LintProblem, LintReport, Linter, MarkupMessage, MarkupValidator, MessageKind, TextTransform,
    ToolError, Toolbox,
};

// =========================================================================
// Trees
// =========================================================================

/// Write each `(path, contents)` under `root`, creating directories.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

/// Every file under `root`, keyed by slash-separated relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = slash_path(e.path().strip_prefix(root).unwrap());
            let bytes = std::fs::read(e.path()).unwrap();
            (relative, String::from_utf8_lossy(&bytes).into_owned())
        })
        .collect()
}

// =========================================================================
// Configurations
// =========================================================================

/// Default configuration rooted at `root/{src,build,dist}`, then adjusted.
pub fn site_config(root: &Path, adjust: impl FnOnce(&mut BuildConfig)) -> BuildConfig {
    let mut config = BuildConfig {
        src_path: root.join("src"),
        build_path: root.join("build"),
        dist_path: root.join("dist"),
        ..BuildConfig::default()
    };
    adjust(&mut config);
    config
}

/// Run context for a single stage test: default tools, a fresh cache, run 1.
pub fn context_for(root: &Path, adjust: impl FnOnce(&mut BuildConfig)) -> RunContext {
    let config = site_config(root, adjust);
    RunContext::new(
        1,
        Arc::new(config),
        Arc::new(Toolbox::default()),
        Arc::new(StageCache::new()),
    )
}

// =========================================================================
// Collaborator doubles
// =========================================================================

/// Linter that records the files of every call and fails the named ones.
#[derive(Default)]
pub struct RecordingLinter {
    failing: HashSet<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingLinter {
    pub fn failing(files: &[&str]) -> Self {
        Self {
            failing: files.iter().map(|f| f.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Linter for RecordingLinter {
    async fn lint(
        &self,
        _root: &Path,
        files: &[PathBuf],
        _config_path: Option<&Path>,
    ) -> Result<LintReport, ToolError> {
        let names: Vec<String> = files.iter().map(|f| slash_path(f)).collect();
        let problems = names
            .iter()
            .filter(|name| self.failing.contains(*name))
            .map(|name| LintProblem {
                file: name.clone(),
                message: "unexpected token".to_string(),
            })
            .collect();
        self.calls.lock().unwrap().push(names);
        Ok(LintReport {
            tool: "recording".to_string(),
            problems,
        })
    }
}

/// Transform that upper-cases its input and counts calls.
#[derive(Default)]
pub struct UppercaseTransform {
    calls: AtomicUsize,
}

impl UppercaseTransform {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextTransform for UppercaseTransform {
    async fn transform(
        &self,
        _source: &Path,
        input: &str,
        _options: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(input.to_uppercase())
    }
}

/// Markup validator with a fixed answer.
pub struct StubValidator {
    available: bool,
    errors_per_file: usize,
}

impl StubValidator {
    pub fn offline() -> Self {
        Self {
            available: false,
            errors_per_file: 0,
        }
    }

    pub fn with_errors(errors_per_file: usize) -> Self {
        Self {
            available: true,
            errors_per_file,
        }
    }
}

#[async_trait]
impl MarkupValidator for StubValidator {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn validate(&self, _name: &str, _html: &str) -> Result<Vec<MarkupMessage>, ToolError> {
        Ok((0..self.errors_per_file)
            .map(|i| MarkupMessage {
                kind: MessageKind::Error,
                message: "Unclosed element p".to_string(),
                line: Some(i as u64 + 1),
            })
            .collect())
    }
}
