//! Rebuild on change.
//!
//! File-system notifications arrive in bursts (an editor save is often a
//! create, a modify and a rename). A [`RebuildGate`] folds them: the first
//! change starts a build, changes during that build set a single pending
//! flag, and when the build settles at most one follow-up build starts.
//! A build in flight is never cancelled.
//!
//! ```text
//! change ──► gate idle? ──yes──► build ──► settled ──► pending? ──yes──► build
//!               │ no                                      │ no
//!               ▼                                         ▼
//!          pending = true                                idle
//! ```

use crate::orchestrator::Orchestrator;
use crate::report;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("build task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of one build, broadcast to live-reload clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Succeeded { run: u64 },
    Failed { message: String },
}

/// Coalesces change notifications into builds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildGate {
    building: bool,
    pending: bool,
}

impl RebuildGate {
    /// A change arrived. Returns `true` when a build should start now.
    pub fn request(&mut self) -> bool {
        if self.building {
            self.pending = true;
            false
        } else {
            self.building = true;
            true
        }
    }

    /// The running build settled. Returns `true` when a follow-up build
    /// should start now.
    pub fn finish(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.building = false;
            false
        }
    }

    pub fn is_building(&self) -> bool {
        self.building
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Run one build and broadcast its outcome.
pub async fn build_and_notify(orchestrator: &Orchestrator, events: &broadcast::Sender<BuildEvent>) {
    let event = match orchestrator.build().await {
        Ok(summary) => {
            report::print_summary(&summary);
            BuildEvent::Succeeded {
                run: summary.run_id,
            }
        }
        Err(e) => {
            tracing::error!("{e}");
            BuildEvent::Failed {
                message: e.to_string(),
            }
        }
    };
    // No receivers is fine: nobody is listening for reloads.
    let _ = events.send(event);
}

fn spawn_build(
    orchestrator: &Orchestrator,
    events: &broadcast::Sender<BuildEvent>,
) -> JoinHandle<()> {
    let orchestrator = orchestrator.clone();
    let events = events.clone();
    tokio::spawn(async move { build_and_notify(&orchestrator, &events).await })
}

async fn settled(running: &mut Option<JoinHandle<()>>) -> Result<(), tokio::task::JoinError> {
    match running {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Build once per burst of `changes` until the channel closes, then let the
/// last build (and a pending follow-up) finish.
pub async fn rebuild_loop(
    orchestrator: Orchestrator,
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    events: broadcast::Sender<BuildEvent>,
) -> Result<(), WatchError> {
    let mut gate = RebuildGate::default();
    let mut running: Option<JoinHandle<()>> = None;
    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(path) = change else { break };
                tracing::debug!(path = %path.display(), "change detected");
                if gate.request() {
                    running = Some(spawn_build(&orchestrator, &events));
                } else {
                    tracing::debug!("build in progress, rebuild queued");
                }
            }
            done = settled(&mut running) => {
                running = None;
                done?;
                if gate.finish() {
                    running = Some(spawn_build(&orchestrator, &events));
                }
            }
        }
    }
    while let Some(handle) = running.take() {
        handle.await?;
        if gate.finish() {
            running = Some(spawn_build(&orchestrator, &events));
        }
    }
    Ok(())
}

/// Whether a notification should trigger a build: output trees nested in
/// the source tree are ignored, as are pure reads.
fn is_relevant(event: &notify::Event, ignored: &[PathBuf]) -> bool {
    if matches!(event.kind, notify::EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| !ignored.iter().any(|skip| path.starts_with(skip)))
}

/// Start watching `root` recursively. Relevant changes are sent on `tx`;
/// the returned watcher must be kept alive.
pub fn start_watcher(
    root: &Path,
    ignored: Vec<PathBuf>,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> Result<notify::RecommendedWatcher, WatchError> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) if is_relevant(&event, &ignored) => {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("watch error: {e}"),
        })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Build once, then watch the source tree and rebuild on change. Runs until
/// the watcher stops.
pub async fn watch(
    orchestrator: Orchestrator,
    events: broadcast::Sender<BuildEvent>,
) -> Result<(), WatchError> {
    build_and_notify(&orchestrator, &events).await;

    let config = orchestrator.config();
    let src = std::path::absolute(&config.src_path)?;
    let ignored = vec![
        std::path::absolute(&config.build_path)?,
        std::path::absolute(&config.dist_path)?,
    ];
    let (tx, rx) = mpsc::unbounded_channel();
    let _watcher = start_watcher(&src, ignored, tx)?;
    tracing::info!(path = %src.display(), "watching for changes");

    rebuild_loop(orchestrator, rx, events).await
}
