//! Task orchestration
//!
//! [`TaskRunner`] executes a task's jobs strictly in order. Each job is
//! dispatched onto its own tokio task with its own [`RunContext`]; the runner
//! waits for that context's result before moving on.

use crate::config::Settings;
use crate::error::{ExecutionError, ExecutionResult, ManifestError};
use crate::logging::Logger;
use crate::manifest::{Job, JobExecType, Manifest};
use crate::plugins::{JobRunner, PluginInit, PluginRegistry};
use crate::runner::{check_condition, RunContext, WaitGroup};
use crate::scope::{Scope, Vars};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// How long a cancelled plugin gets to return from `call`
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

struct Inner {
    manifest: Manifest,
    globals: Arc<Vars>,
    settings: Arc<Settings>,
    registry: Arc<PluginRegistry>,
    cancel: CancellationToken,
    wait_group: Arc<WaitGroup>,
}

/// Runs tasks from a manifest
///
/// Cloning is cheap; clones share the manifest, the registry and the root
/// cancellation token.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<Inner>,
}

impl TaskRunner {
    pub fn new(manifest: Manifest, settings: Arc<Settings>, registry: Arc<PluginRegistry>) -> Self {
        let globals = Arc::new(manifest.vars.clone());
        TaskRunner {
            inner: Arc::new(Inner {
                manifest,
                globals,
                settings,
                registry,
                cancel: CancellationToken::new(),
                wait_group: Arc::new(WaitGroup::new()),
            }),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Root context for a run of `task_name`
    pub fn root_context(&self, task_name: &str) -> RunContext {
        RunContext::new(
            Vars::new(),
            Logger::for_run(task_name),
            self.inner.cancel.child_token(),
        )
        .with_wait_group(self.inner.wait_group.clone())
    }

    /// Run a task to completion
    pub async fn run_task(&self, task_name: &str) -> ExecutionResult<()> {
        if self.is_stopped() {
            return Err(ExecutionError::Cancelled);
        }

        let ctx = self.root_context(task_name);
        ctx.logger().info(format!("running task '{}'", task_name));
        self.run_task_in(task_name.to_string(), ctx).await
    }

    /// Run a task under an existing context
    pub fn run_task_in(
        &self,
        task_name: String,
        ctx: RunContext,
    ) -> BoxFuture<'_, ExecutionResult<()>> {
        self.run_jobs(task_name, ctx).boxed()
    }

    async fn run_jobs(&self, task_name: String, ctx: RunContext) -> ExecutionResult<()> {
        if ctx.is_task_in_stack(&task_name) {
            let mut path = ctx.task_stack().to_vec();
            path.push(task_name);
            return Err(ManifestError::CyclicReference(path.join(" -> ")).into());
        }

        let ctx = ctx.with_task(&task_name);
        let jobs = self.inner.manifest.resolve_entries(&task_name)?;

        for (step, resolved) in jobs.iter().enumerate() {
            ctx.logger().debug(format!(
                "[{}/{}] {}",
                step + 1,
                jobs.len(),
                resolved.format_description()
            ));

            if let Err(source) = self.run_step(&resolved.job, &ctx).await {
                return Err(ExecutionError::JobFailed {
                    task: task_name,
                    index: resolved.entry,
                    job: resolved.format_description(),
                    source: Box::new(source),
                });
            }
        }

        Ok(())
    }

    /// Cancel every running task
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Wait until every dispatched job has reported its result
    pub async fn join(&self) {
        self.inner.wait_group.wait().await
    }

    /// Run one job of a task and wait for its result
    async fn run_step(&self, job: &Job, ctx: &RunContext) -> ExecutionResult<()> {
        if !self.prepare(job, ctx).await? {
            return Ok(());
        }

        let job_ctx = match job.exec_type() {
            JobExecType::Empty => {
                ctx.logger().info("nothing to run");
                return Ok(());
            }
            JobExecType::Mixin => return Err(unresolved_mixin(job)),
            JobExecType::Plugin => ctx.child_context(),
            JobExecType::Task => ctx.fork(),
        };

        let waiter = job_ctx.waiter()?;
        self.dispatch(job.clone(), job_ctx);
        waiter.wait().await
    }

    /// Apply delay and condition; returns whether the job should run
    async fn prepare(&self, job: &Job, ctx: &RunContext) -> ExecutionResult<bool> {
        if ctx.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        if !job.delay.is_zero() {
            ctx.logger().debug(format!("waiting {}ms", job.delay.as_millis()));
            tokio::select! {
                _ = tokio::time::sleep(job.delay) => {}
                _ = ctx.cancelled() => return Err(ExecutionError::Cancelled),
            }
        }

        if let Some(condition) = job.condition() {
            let command = self.scope(job, ctx).expand(condition)?;
            if !check_condition(&command, &self.inner.settings, ctx).await? {
                ctx.logger().info(format!(
                    "skipping {}: condition not met",
                    job.format_description()
                ));
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Register and start a job in the background; the result goes to `ctx`
    fn dispatch(&self, job: Job, ctx: RunContext) {
        ctx.register();
        let runner = self.clone();
        let span = ctx.logger().span().clone();
        tokio::spawn(
            async move {
                let result = runner.execute(&job, &ctx).await;
                ctx.result(result);
            }
            .instrument(span),
        );
    }

    async fn execute(&self, job: &Job, ctx: &RunContext) -> ExecutionResult<()> {
        match job.exec_type() {
            JobExecType::Plugin => self.call_plugin(job, ctx).await,
            JobExecType::Task => {
                let task_name = job.task_name.clone().unwrap_or_default();
                self.run_task_in(task_name, ctx.clone().with_vars(&job.vars))
                    .await
            }
            JobExecType::Mixin => Err(unresolved_mixin(job)),
            JobExecType::Empty => Ok(()),
        }
    }

    async fn call_plugin(&self, job: &Job, ctx: &RunContext) -> ExecutionResult<()> {
        let name = job.plugin_name.clone().unwrap_or_default();
        let plugin = self.inner.registry.instantiate(PluginInit {
            name,
            params: job.params.clone(),
            scope: self.scope(job, ctx),
            settings: self.inner.settings.clone(),
            logger: ctx.logger().clone(),
        })?;

        let runner: Arc<dyn JobRunner> = Arc::new(self.clone());
        let mut call = plugin.call(ctx, runner);

        tokio::select! {
            result = &mut call => result,
            _ = ctx.cancelled() => {
                ctx.logger().debug("cancelling plugin");
                if let Err(e) = plugin.cancel(ctx).await {
                    ctx.logger().warn(format!("plugin cancel failed: {}", e));
                }

                match tokio::time::timeout(CANCEL_GRACE_PERIOD, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        ctx.logger().warn("plugin did not stop within the grace period");
                        Err(ExecutionError::Cancelled)
                    }
                }
            }
        }
    }

    /// Variable scope of a job running under `ctx`
    fn scope(&self, job: &Job, ctx: &RunContext) -> Scope {
        Scope::new(self.inner.settings.environment.clone())
            .with_globals(self.inner.globals.clone())
            .with_context(ctx.root_vars().clone())
            .with_locals(job.vars.clone())
    }
}

impl JobRunner for TaskRunner {
    fn run_job(&self, job: Job, ctx: RunContext) {
        ctx.register();
        let runner = self.clone();
        let span = ctx.logger().span().clone();
        tokio::spawn(
            async move {
                let result = match runner.prepare(&job, &ctx).await {
                    Ok(true) => runner.execute(&job, &ctx).await,
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                };
                ctx.result(result);
            }
            .instrument(span),
        );
    }
}

fn unresolved_mixin(job: &Job) -> ExecutionError {
    ManifestError::Invalid(format!(
        "mixin '{}' was not inlined before execution",
        job.mixin_name.as_deref().unwrap_or_default()
    ))
    .into()
}
