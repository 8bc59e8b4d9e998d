//! CLI output: the build report and run summaries.
//!
//! # Output Format
//!
//! ## Build report (`post-build:report`)
//!
//! ```text
//! Build report
//! ------------
//!
//! A total of 4 files weighing 18 KB were generated.
//!
//! .css 1 3 KB
//!     css/site.3f2a9c1e.css 3 KB
//! .html 2 5 KB
//!     about.html 2 KB
//!     index.html 3 KB
//! .js 1 10 KB
//!     js/app.c01d77e4.js 10 KB
//! ```
//!
//! ## Run summary
//!
//! ```text
//! pre-build:lint-js          2 files checked
//! build:setup                14 files copied, 0 removed
//! build:revision             6 files renamed
//! post-build:validate-html   unavailable: no connection to validator
//! Build 1 promoted to dist (3 cached, 2 processed (5 total))
//! ```
//!
//! ## Stage list (`drudge check`)
//!
//! ```text
//! 01 build:setup
//! 02 build:templates
//! 03 build:clean
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::orchestrator::{BuildSummary, StageStatus};
use crate::pattern::slash_path;
use crate::stages::StageId;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// One file of the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Slash-separated path relative to the tree root.
    pub path: String,
    pub size: u64,
}

/// File statistics of an output tree, grouped by extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Extension with its leading dot (`.css`), or empty for files without one.
    pub by_type: BTreeMap<String, Vec<FileStat>>,
}

impl BuildReport {
    /// Walk `root` and collect every file.
    pub fn collect(root: &Path) -> io::Result<Self> {
        let mut report = Self::default();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let extension = relative
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            report.by_type.entry(extension).or_default().push(FileStat {
                path: slash_path(relative),
                size: entry.metadata().map_err(io::Error::other)?.len(),
            });
        }
        Ok(report)
    }

    pub fn total_files(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.by_type.values().flatten().map(|f| f.size).sum()
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Human-readable size, rounded to whole units.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.0} KB", b / KB)
    } else {
        format!("{:.0} MB", b / MB)
    }
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Format a 1-based positional index as 2-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>2}", pos)
}

// ============================================================================
// Build report
// ============================================================================

pub fn format_report(report: &BuildReport) -> Vec<String> {
    let mut lines = vec![
        "Build report".to_string(),
        "------------".to_string(),
        String::new(),
        format!(
            "A total of {} files weighing {} were generated.",
            report.total_files(),
            format_size(report.total_size())
        ),
        String::new(),
    ];
    for (extension, files) in &report.by_type {
        let size: u64 = files.iter().map(|f| f.size).sum();
        let label = if extension.is_empty() {
            "(none)"
        } else {
            extension.as_str()
        };
        lines.push(format!("{} {} {}", label, files.len(), format_size(size)));
        for file in files {
            lines.push(format!("{}{} {}", indent(1), file.path, format_size(file.size)));
        }
    }
    lines
}

pub fn print_report(report: &BuildReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Run summary
// ============================================================================

fn status_detail(status: &StageStatus) -> String {
    match status {
        StageStatus::Completed(Some(detail)) => detail.clone(),
        StageStatus::Completed(None) => "done".to_string(),
        StageStatus::Unavailable(reason) => format!("unavailable: {reason}"),
        StageStatus::Skipped => "skipped".to_string(),
        StageStatus::Failed(message) => format!("failed: {message}"),
    }
}

pub fn format_summary(summary: &BuildSummary) -> Vec<String> {
    let width = summary
        .stages
        .iter()
        .map(|r| r.stage.name().len())
        .max()
        .unwrap_or(0);
    let mut lines: Vec<String> = summary
        .stages
        .iter()
        .map(|r| {
            format!(
                "{:<width$}   {}",
                r.stage.name(),
                status_detail(&r.status),
                width = width
            )
        })
        .collect();
    lines.push(format!(
        "Build {} promoted to {} ({})",
        summary.run_id,
        summary.dist_path.display(),
        summary.cache
    ));
    lines
}

pub fn print_summary(summary: &BuildSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}

// ============================================================================
// Stage list
// ============================================================================

pub fn format_stage_list(stages: &[StageId]) -> Vec<String> {
    stages
        .iter()
        .enumerate()
        .map(|(i, stage)| format!("{} {}", format_index(i + 1), stage.name()))
        .collect()
}

pub fn print_stage_list(stages: &[StageId]) {
    for line in format_stage_list(stages) {
        println!("{}", line);
    }
}
