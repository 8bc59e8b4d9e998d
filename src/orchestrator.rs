//! Build orchestration.
//!
//! An [`Orchestrator`] owns one resolved configuration and runs its stage list
//! on demand:
//!
//! ```text
//! build()  ──► queue (FIFO) ──► claim cache ──► stage 1 ──► stage 2 ──► ... ──► promote
//!                                                  │ error
//!                                                  ▼
//!                                      later stages skipped ──► discard build tree
//! ```
//!
//! Every stage works in the temporary tree (`build_path`), post-build stages
//! included. `dist_path` is touched exactly once per successful run, when the
//! temporary tree is renamed over it; a failed run leaves it as it was.
//!
//! Overlapping calls to [`Orchestrator::build`] wait on a fair
//! [`tokio::sync::Mutex`], so runs execute one at a time in call order.

use crate::actions::{self, RunContext, StageError, StageOutcome, remove_dir_if_exists};
use crate::cache::{CacheStats, StageCache};
use crate::config::{BuildConfig, ConfigError};
use crate::report::BuildReport;
use crate::stages::StageId;
use crate::tools::Toolbox;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: StageError,
    },
    #[error("failed to promote {from} to {to}: {source}")]
    Promote {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One execution of the stage list.
#[derive(Debug, Clone)]
pub struct BuildRun {
    pub id: u64,
    pub stages: Vec<StageId>,
    /// Set by the first failing stage; later stages see it and do nothing.
    pub failed: bool,
    pub state: RunState,
    pub build_path: PathBuf,
    pub dist_path: PathBuf,
}

impl BuildRun {
    fn new(id: u64, stages: Vec<StageId>, config: &BuildConfig) -> Self {
        Self {
            id,
            stages,
            failed: false,
            state: RunState::Pending,
            build_path: config.build_path.clone(),
            dist_path: config.dist_path.clone(),
        }
    }
}

/// How a stage ended within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed(Option<String>),
    /// The environment could not support the stage (validator offline).
    Unavailable(String),
    /// Not run because an earlier stage failed.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: StageId,
    pub status: StageStatus,
    pub elapsed: Duration,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub run_id: u64,
    pub stages: Vec<StageRecord>,
    pub dist_path: PathBuf,
    pub cache: CacheStats,
    /// Present when `post-build:report` ran.
    pub report: Option<BuildReport>,
}

struct Inner {
    id: u64,
    config: Arc<BuildConfig>,
    stages: Vec<StageId>,
    tools: Arc<Toolbox>,
    cache: Arc<StageCache>,
    /// Number of runs started; the lock is the FIFO queue.
    queue: tokio::sync::Mutex<u64>,
}

/// Runs builds for one configuration. Cheap to clone; clones share the queue
/// and the cache.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Orchestrator with the default collaborators and a private cache.
    pub fn new(config: BuildConfig) -> Result<Self, BuildError> {
        let tools = Toolbox::from_config(&config);
        Self::with_parts(config, tools, Arc::new(StageCache::new()))
    }

    /// Orchestrator with explicit collaborators and a possibly shared cache.
    pub fn with_parts(
        config: BuildConfig,
        tools: Toolbox,
        cache: Arc<StageCache>,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        let stages = config.stages()?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                config: Arc::new(config),
                stages,
                tools: Arc::new(tools),
                cache,
                queue: tokio::sync::Mutex::new(0),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &BuildConfig {
        &self.inner.config
    }

    /// The effective stage list, in execution order.
    pub fn stages(&self) -> &[StageId] {
        &self.inner.stages
    }

    pub fn cache(&self) -> &Arc<StageCache> {
        &self.inner.cache
    }

    /// Run the stage list once. Waits for any run already in progress.
    pub async fn build(&self) -> Result<BuildSummary, BuildError> {
        let inner = &self.inner;
        let mut started = inner.queue.lock().await;
        *started += 1;
        let mut run = BuildRun::new(*started, inner.stages.clone(), &inner.config);

        if !inner.cache.claim(inner.id, &inner.stages) {
            tracing::debug!(instance = inner.id, "stage cache reset");
        }
        let mut ctx = RunContext::new(
            run.id,
            Arc::clone(&inner.config),
            Arc::clone(&inner.tools),
            Arc::clone(&inner.cache),
        );

        run.state = RunState::Running;
        let build_started = Instant::now();
        let mut records = Vec::with_capacity(run.stages.len());
        let mut failure = None;
        for &stage in &run.stages {
            if run.failed {
                tracing::debug!(run = run.id, stage = %stage, "skipped");
                records.push(StageRecord {
                    stage,
                    status: StageStatus::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }
            let stage_started = Instant::now();
            tracing::info!(run = run.id, stage = %stage, "starting");
            let status = match actions::run(stage, &mut ctx).await {
                Ok(StageOutcome::Completed(detail)) => StageStatus::Completed(detail),
                Ok(StageOutcome::Unavailable(reason)) => {
                    tracing::warn!(run = run.id, stage = %stage, "skipped: {reason}");
                    StageStatus::Unavailable(reason)
                }
                Err(e) => {
                    tracing::error!(run = run.id, stage = %stage, "{e}");
                    run.failed = true;
                    let status = StageStatus::Failed(e.to_string());
                    failure = Some((stage, e));
                    status
                }
            };
            let elapsed = stage_started.elapsed();
            tracing::debug!(run = run.id, stage = %stage, ?elapsed, "finished");
            records.push(StageRecord {
                stage,
                status,
                elapsed,
            });
        }

        if let Some((stage, source)) = failure {
            run.state = RunState::Failed;
            discard(&run.build_path).await;
            return Err(BuildError::Stage { stage, source });
        }

        promote(&run.build_path, &run.dist_path).await?;
        run.state = RunState::Succeeded;
        tracing::info!(
            run = run.id,
            elapsed = ?build_started.elapsed(),
            cache = %ctx.stats,
            "build promoted to {}",
            run.dist_path.display()
        );
        Ok(BuildSummary {
            run_id: run.id,
            stages: records,
            dist_path: run.dist_path,
            cache: ctx.stats,
            report: ctx.report.take(),
        })
    }
}

/// Remove the temporary tree of a failed run.
async fn discard(build: &Path) {
    let build = build.to_path_buf();
    let removed = tokio::task::spawn_blocking(move || remove_dir_if_exists(&build)).await;
    match removed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("failed to remove temporary tree: {e}"),
        Err(e) => tracing::warn!("failed to remove temporary tree: {e}"),
    }
}

/// Replace `dist` with `build`.
async fn promote(build: &Path, dist: &Path) -> Result<(), BuildError> {
    let (from, to) = (build.to_path_buf(), dist.to_path_buf());
    let result = tokio::task::spawn_blocking({
        let (from, to) = (from.clone(), to.clone());
        move || -> io::Result<()> {
            remove_dir_if_exists(&to)?;
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&from, &to)
        }
    })
    .await?;
    result.map_err(|source| BuildError::Promote { from, to, source })
}
