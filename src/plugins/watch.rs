//! Debounced file watcher plugin
//!
//! Watches a path and runs a job once changes settle. Events arriving within
//! the debounce interval of each other coalesce into one run, and a new run
//! cancels the previous one if it is still going.

use crate::error::{ExecutionError, ExecutionResult};
use crate::logging::Logger;
use crate::manifest::Job;
use crate::plugins::{JobRunner, Plugin, PluginInit};
use crate::runner::RunContext;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Registered name of the plugin
pub const PLUGIN_NAME: &str = "watch";

/// Debounce interval used when none is configured, in milliseconds
pub const DEFAULT_DEBOUNCE_MILLIS: u64 = 1000;

fn default_debounce() -> u64 {
    DEFAULT_DEBOUNCE_MILLIS
}

fn default_recursive() -> bool {
    true
}

/// Parameters as written in the manifest, minus the nested job
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchParams {
    /// File or directory to watch
    pub path: PathBuf,

    /// Quiet period before the job runs, in milliseconds
    #[serde(default = "default_debounce")]
    pub debounce_time: u64,

    /// Glob patterns for paths whose changes are ignored
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Watch subdirectories too
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

/// Decides which filesystem events count as changes
#[derive(Debug, Clone)]
pub struct EventFilter {
    root: PathBuf,
    ignore: Option<GlobSet>,
}

impl EventFilter {
    pub fn new(root: PathBuf, patterns: &[String]) -> Result<Self, globset::Error> {
        let ignore = if patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        Ok(EventFilter { root, ignore })
    }

    /// Whether a path matches one of the ignore patterns
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Some(ignore) = &self.ignore else {
            return false;
        };

        ignore.is_match(path)
            || path
                .strip_prefix(&self.root)
                .is_ok_and(|relative| ignore.is_match(relative))
    }

    /// Whether an event should reset the debounce timer
    ///
    /// Access events never do; other events do unless every path they carry
    /// is ignored.
    pub fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }

        event.paths.is_empty() || !event.paths.iter().all(|p| self.is_ignored(p))
    }
}

/// Coalesce events into calls of `on_fire`
///
/// Each relevant event restarts an `interval` timer; `on_fire` runs when the
/// timer elapses with changes pending. Returns when `stop` is cancelled or the
/// event channel closes.
pub async fn debounce_loop<T, R, F>(
    mut events: mpsc::UnboundedReceiver<T>,
    interval: Duration,
    stop: CancellationToken,
    mut is_relevant: R,
    mut on_fire: F,
) where
    R: FnMut(&T) -> bool,
    F: FnMut(),
{
    let timer = tokio::time::sleep(interval);
    tokio::pin!(timer);
    let mut dirty = false;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if is_relevant(&event) {
                        dirty = true;
                        timer.as_mut().reset(Instant::now() + interval);
                    }
                }
                None => break,
            },
            _ = &mut timer, if dirty => {
                dirty = false;
                on_fire();
            }
        }
    }
}

/// Starts the watched job, keeping at most one invocation active
pub struct JobTrigger {
    ctx: RunContext,
    runner: Arc<dyn JobRunner>,
    job: Job,
    active: Option<RunContext>,
    logger: Logger,
}

impl JobTrigger {
    pub fn new(ctx: RunContext, runner: Arc<dyn JobRunner>, job: Job, logger: Logger) -> Self {
        JobTrigger {
            ctx,
            runner,
            job,
            active: None,
            logger,
        }
    }

    /// Cancel the previous invocation and start a new one
    pub fn fire(&mut self) {
        if let Some(previous) = self.active.take() {
            if previous.is_alive() {
                self.logger.debug("cancelling previous run");
            }
            previous.cancel();
        }

        let ctx = self.ctx.child_context();
        let waiter = match ctx.waiter() {
            Ok(waiter) => waiter,
            Err(e) => {
                self.logger.error(e);
                return;
            }
        };

        self.logger
            .info(format!("change detected, running {}", self.job.format_description()));
        self.runner.run_job(self.job.clone(), ctx.clone());
        self.active = Some(ctx);

        let logger = self.logger.clone();
        tokio::spawn(async move {
            match waiter.wait().await {
                Ok(()) => logger.debug("run finished"),
                Err(e) if e.is_cancelled() => logger.debug("run cancelled"),
                Err(e) => logger.error(format!("run failed: {}", e)),
            }
        });
    }

    /// The invocation started last, if any
    pub fn active(&self) -> Option<&RunContext> {
        self.active.as_ref()
    }

    /// Cancel the active invocation
    pub fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
        }
    }
}

/// Plugin running a job whenever a watched path changes
pub struct WatchPlugin {
    path: PathBuf,
    interval: Duration,
    recursive: bool,
    filter: EventFilter,
    job: Job,
    logger: Logger,
    stop: CancellationToken,
}

impl WatchPlugin {
    /// Build the plugin; the nested job is kept unexpanded until it runs
    pub fn new(init: PluginInit) -> ExecutionResult<Self> {
        let mut params = init.params.clone();
        let job = params
            .remove("job")
            .ok_or_else(|| init.error("'job' parameter is required"))?;
        let job: Job = serde_yaml::from_value(job)
            .map_err(|e| init.error(format!("invalid 'job' parameter: {}", e)))?;

        let params: WatchParams = init.decode_from(&params)?;
        let path = if params.path.is_absolute() {
            params.path
        } else {
            init.settings.project_dir.join(params.path)
        };

        let filter = EventFilter::new(path.clone(), &params.ignore)
            .map_err(|e| init.error(format!("invalid ignore pattern: {}", e)))?;

        Ok(WatchPlugin {
            path,
            interval: Duration::from_millis(params.debounce_time),
            recursive: params.recursive,
            filter,
            job,
            logger: init.logger,
            stop: CancellationToken::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The job run on changes
    pub fn job(&self) -> &Job {
        &self.job
    }

    fn watch_error(&self, error: notify::Error) -> ExecutionError {
        ExecutionError::Watch {
            path: self.path.clone(),
            message: error.to_string(),
        }
    }

    fn start_watcher(
        &self,
    ) -> ExecutionResult<(RecommendedWatcher, mpsc::UnboundedReceiver<notify::Result<Event>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })
        .map_err(|e| self.watch_error(e))?;

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&self.path, mode)
            .map_err(|e| self.watch_error(e))?;

        Ok((watcher, rx))
    }
}

#[async_trait]
impl Plugin for WatchPlugin {
    async fn call(&self, ctx: &RunContext, runner: Arc<dyn JobRunner>) -> ExecutionResult<()> {
        if ctx.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let (watcher, events) = self.start_watcher()?;
        self.logger.info(format!(
            "watching {} (debounce {}ms)",
            self.path.display(),
            self.interval.as_millis()
        ));

        let loop_stop = self.stop.child_token();
        let event_loop = {
            let stop = loop_stop.clone();
            let interval = self.interval;
            let filter = self.filter.clone();
            let logger = self.logger.clone();
            let mut trigger = JobTrigger::new(
                ctx.clone(),
                runner,
                self.job.clone(),
                self.logger.clone(),
            );

            tokio::spawn(async move {
                debounce_loop(
                    events,
                    interval,
                    stop,
                    |event| match event {
                        Ok(event) => filter.is_relevant(event),
                        Err(e) => {
                            logger.warn(format!("watch error: {}", e));
                            false
                        }
                    },
                    || trigger.fire(),
                )
                .await;
                trigger.shutdown();
            })
        };

        tokio::select! {
            _ = self.stop.cancelled() => self.logger.debug("watch stopped"),
            _ = ctx.cancelled() => self.logger.debug("context cancelled, stopping watch"),
        }

        loop_stop.cancel();
        if let Err(e) = event_loop.await {
            self.logger.warn(format!("watch loop ended abnormally: {}", e));
        }
        drop(watcher);

        if ctx.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        Ok(())
    }

    async fn cancel(&self, _ctx: &RunContext) -> ExecutionResult<()> {
        self.stop.cancel();
        Ok(())
    }
}
