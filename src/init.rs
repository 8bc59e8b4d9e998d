//! Project scaffolding (`drudge init`).
//!
//! Writes a starter source tree and a `drudge.toml` into a directory. Existing
//! files are never overwritten: the source tree is only created when the
//! source directory is absent, the config only when no config file exists.

use crate::config::find_config;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG: &str = include_str!("../scaffold/drudge.toml");

/// Starter source tree, relative to the source directory.
const SOURCE_TREE: &[(&str, &str)] = &[
    ("index.html", include_str!("../scaffold/src/index.html")),
    ("index.ctx.json", include_str!("../scaffold/src/index.ctx.json")),
    ("css/main.css", include_str!("../scaffold/src/css/main.css")),
    ("js/main.js", include_str!("../scaffold/src/js/main.js")),
];

#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// What `init` created.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scaffolded {
    pub config: Option<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// Scaffold `dir`. The source tree goes to `dir/src`, the path the starter
/// config points at.
pub fn init(dir: &Path) -> Result<Scaffolded, InitError> {
    let mut created = Scaffolded::default();

    let src = dir.join("src");
    if src.exists() {
        tracing::info!(path = %src.display(), "source tree exists, leaving it alone");
    } else {
        for (relative, contents) in SOURCE_TREE {
            let path = src.join(relative);
            write_new(&path, contents)?;
            created.files.push(path);
        }
    }

    match find_config(dir) {
        Some(existing) => {
            tracing::info!(path = %existing.display(), "config exists, leaving it alone");
        }
        None => {
            let path = dir.join("drudge.toml");
            write_new(&path, CONFIG)?;
            created.config = Some(path);
        }
    }
    Ok(created)
}

fn write_new(path: &Path, contents: &str) -> Result<(), InitError> {
    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    };
    write().map_err(|source| InitError::Write {
        path: path.to_path_buf(),
        source,
    })
}
