//! End-to-end builds through the public API: a config file on disk, a source
//! tree, and the final tree after promotion.

use async_trait::async_trait;
use drudge::cache::StageCache;
use drudge::config::load_config;
use drudge::orchestrator::{BuildError, Orchestrator, StageStatus};
use drudge::stages::StageId;
use drudge::tools::{InterpolationRenderer, TemplateJob, TemplateRenderer, ToolError, Toolbox};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

fn read_tree(root: &Path) -> BTreeMap<String, String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (key, std::fs::read_to_string(e.path()).unwrap())
        })
        .collect()
}

/// A project directory with `drudge.toml` and a source tree.
fn project(config: &str, src: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_tree(tmp.path(), &[("drudge.toml", config)]);
    write_tree(&tmp.path().join("src"), src);
    tmp
}

fn orchestrator(dir: &Path) -> Orchestrator {
    Orchestrator::new(load_config(None, dir).unwrap()).unwrap()
}

const SITE: &[(&str, &str)] = &[
    (
        "index.html",
        r#"<link rel="stylesheet" href="style.css"><script src="app.js"></script><h1>{{ title }}</h1>"#,
    ),
    ("style.css", ".title { color: red; }"),
    ("app.js", "console.log(1);"),
];

// =========================================================================
// Revisioning
// =========================================================================

#[tokio::test]
async fn templates_and_revision_with_protected_css() {
    let tmp = project(
        r#"
[templates]
files = "/**/*.html"
data = { title = "Home" }

[revision]
files = "/**/*"
options = { dont_rename = [".html", ".css"] }
"#,
        SITE,
    );

    orchestrator(tmp.path()).build().await.unwrap();

    let dist = read_tree(&tmp.path().join("dist"));
    let script_name = Regex::new(r"^app\.[0-9a-f]{8}\.js$").unwrap();
    let names: Vec<&String> = dist.keys().collect();
    assert_eq!(names.len(), 3);
    let script = names
        .iter()
        .find(|n| script_name.is_match(n))
        .expect("app.js is renamed");
    assert!(dist.contains_key("index.html"));
    assert!(dist.contains_key("style.css"));
    assert_eq!(
        dist["index.html"],
        format!(
            r#"<link rel="stylesheet" href="style.css"><script src="{script}"></script><h1>Home</h1>"#
        )
    );
}

#[tokio::test]
async fn without_revision_names_are_kept() {
    let tmp = project(
        r#"
[templates]
files = "/**/*.html"
data = { title = "Home" }
"#,
        SITE,
    );

    orchestrator(tmp.path()).build().await.unwrap();

    let dist = read_tree(&tmp.path().join("dist"));
    assert_eq!(
        dist.keys().cloned().collect::<Vec<_>>(),
        vec!["app.js", "index.html", "style.css"]
    );
    assert!(dist["index.html"].contains(r#"<script src="app.js">"#));
}

#[tokio::test]
async fn one_byte_change_changes_the_fingerprint() {
    let config = r#"
[revision]
files = "/**/*"
"#;
    let first = project(config, SITE);
    let second = project(
        config,
        &[SITE[0], SITE[1], ("app.js", "console.log(2);")],
    );
    orchestrator(first.path()).build().await.unwrap();
    orchestrator(second.path()).build().await.unwrap();

    let a = read_tree(&first.path().join("dist"));
    let b = read_tree(&second.path().join("dist"));
    assert_ne!(a["index.html"], b["index.html"]);
    let js = |tree: &BTreeMap<String, String>| {
        tree.keys().find(|k| k.ends_with(".js")).cloned().unwrap()
    };
    assert_ne!(js(&a), js(&b));
}

// =========================================================================
// Stylesheet pruning
// =========================================================================

#[tokio::test]
async fn pruning_without_markup_removes_nothing() {
    let tmp = project(
        r#"
[clean_css]
files = "/**/*.css"
"#,
        &[("style.css", ".unused { color: red; }")],
    );

    let summary = orchestrator(tmp.path()).build().await.unwrap();

    let record = summary
        .stages
        .iter()
        .find(|r| r.stage == StageId::CleanCss)
        .unwrap();
    assert_eq!(
        record.status,
        StageStatus::Completed(Some("0 unused rules removed".into()))
    );
    assert_eq!(
        read_tree(&tmp.path().join("dist"))["style.css"],
        ".unused { color: red; }"
    );
}

// =========================================================================
// Rollback and caching
// =========================================================================

#[tokio::test]
async fn failed_build_leaves_previous_output() {
    let tmp = project(
        r#"
[templates]
files = "/**/*.html"
"#,
        &[("index.html", "<p>ok</p>")],
    );
    let orchestrator = orchestrator(tmp.path());
    orchestrator.build().await.unwrap();

    write_tree(
        &tmp.path().join("src"),
        &[("index.html", "{% markdown %} never closed")],
    );
    let err = orchestrator.build().await.unwrap_err();

    assert!(matches!(
        err,
        BuildError::Stage {
            stage: StageId::Templates,
            ..
        }
    ));
    assert_eq!(read_tree(&tmp.path().join("dist"))["index.html"], "<p>ok</p>");
    assert!(!tmp.path().join("build").exists());
}

#[test]
fn build_path_around_the_source_is_rejected() {
    let tmp = project(
        r#"
src_path = "./site/src"
build_path = "./site"
"#,
        &[],
    );
    write_tree(&tmp.path().join("site/src"), &[("index.html", "<p>ok</p>")]);

    assert!(load_config(None, tmp.path()).is_err());
    assert!(tmp.path().join("site/src/index.html").exists());
}

#[tokio::test]
async fn rebuild_reuses_cached_templates() {
    let tmp = project(
        r#"
[templates]
files = "/**/*.html"
"#,
        &[("a.html", "a"), ("b.html", "b")],
    );
    let orchestrator = orchestrator(tmp.path());

    let first = orchestrator.build().await.unwrap();
    assert_eq!((first.cache.hits, first.cache.misses), (0, 2));

    write_tree(&tmp.path().join("src"), &[("b.html", "changed")]);
    let second = orchestrator.build().await.unwrap();
    assert_eq!((second.cache.hits, second.cache.misses), (1, 1));
    assert_eq!(read_tree(&tmp.path().join("dist"))["b.html"], "changed");
}

// =========================================================================
// Queueing
// =========================================================================

/// Renderer that takes its time and records when each render starts and
/// ends. Every render also edits its own source, so the next run cannot be
/// served from the cache.
struct SlowRenderer {
    log: Arc<Mutex<Vec<&'static str>>>,
    source: PathBuf,
}

#[async_trait]
impl TemplateRenderer for SlowRenderer {
    async fn render(&self, job: &TemplateJob) -> Result<String, ToolError> {
        self.log.lock().unwrap().push("start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let edits = self.log.lock().unwrap().len();
        std::fs::write(&self.source, format!("<p>{edits}</p>")).unwrap();
        self.log.lock().unwrap().push("end");
        InterpolationRenderer.render(job).await
    }
}

#[tokio::test]
async fn concurrent_builds_run_one_after_the_other() {
    let tmp = project(
        r#"
[templates]
files = "/**/*.html"
"#,
        &[("index.html", "<p>hi</p>")],
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let tools = Toolbox {
        renderer: Arc::new(SlowRenderer {
            log: log.clone(),
            source: tmp.path().join("src/index.html"),
        }),
        ..Toolbox::default()
    };
    let first = Orchestrator::with_parts(
        load_config(None, tmp.path()).unwrap(),
        tools,
        Arc::new(StageCache::new()),
    )
    .unwrap();
    let second = first.clone();

    let (a, b) = tokio::join!(first.build(), second.build());

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!((a.run_id, b.run_id), (1, 2));
    assert_eq!(*log.lock().unwrap(), vec!["start", "end", "start", "end"]);
}
