//! Shell command plugin
//!
//! Runs one command line through a shell. Unset parameters fall back to the
//! invocation settings: the project directory and the platform shell.

use crate::config::Settings;
use crate::error::{ExecutionError, ExecutionResult};
use crate::logging::Logger;
use crate::plugins::{JobRunner, Plugin, PluginInit};
use crate::runner::RunContext;
use crate::scope::Vars;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Registered name of the plugin
pub const PLUGIN_NAME: &str = "shell";

/// How long a killed process gets to exit before we stop waiting
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Parameters as written in the manifest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellParams {
    /// Command to execute
    pub command: String,

    /// Hide stdout and stderr
    pub silent: bool,

    /// Pass output through without log decoration
    pub raw_output: bool,

    /// Shell binary
    pub shell: Option<String>,

    /// Flag the shell takes before the command string, e.g. `-c`
    pub shell_exec_param: Option<String>,

    /// Working directory, relative to the project directory
    pub work_dir: Option<PathBuf>,

    /// Environment variables added to the inherited environment
    pub env: Vars,
}

/// How child process output is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Silent,
    Raw,
    Decorated,
}

/// A fully resolved command line
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub command: String,
    pub shell: String,
    pub shell_exec_param: String,
    pub work_dir: PathBuf,
    pub env: Vars,
    pub output: OutputMode,
}

impl ShellCommand {
    /// Resolve manifest parameters against the settings
    pub fn resolve(params: ShellParams, settings: &Settings) -> Self {
        let work_dir = match params.work_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => settings.project_dir.join(dir),
            None => settings.project_dir.clone(),
        };

        let output = if params.silent {
            OutputMode::Silent
        } else if params.raw_output {
            OutputMode::Raw
        } else {
            OutputMode::Decorated
        };

        ShellCommand {
            command: params.command,
            shell: params.shell.unwrap_or_else(|| settings.shell.clone()),
            shell_exec_param: params
                .shell_exec_param
                .unwrap_or_else(|| settings.shell_exec_param.clone()),
            work_dir,
            env: params.env,
            output,
        }
    }

    /// Build the process, inheriting `environment` with this command's env on top
    fn to_command(&self, environment: &Vars) -> Command {
        let mut cmd = Command::new(&self.shell);
        if !self.shell_exec_param.is_empty() {
            cmd.arg(&self.shell_exec_param);
        }
        cmd.arg(&self.command)
            .current_dir(&self.work_dir)
            .envs(environment)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match self.output {
            OutputMode::Silent => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
            OutputMode::Raw => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Decorated => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        cmd
    }
}

/// Plugin running a single shell command
pub struct ShellPlugin {
    command: ShellCommand,
    environment: Arc<Vars>,
    logger: Logger,
    stop: CancellationToken,
}

impl ShellPlugin {
    pub fn new(init: PluginInit) -> ExecutionResult<Self> {
        let params: ShellParams = init.decode()?;
        if params.command.trim().is_empty() {
            return Err(init.error("'command' parameter is required"));
        }

        Ok(ShellPlugin {
            command: ShellCommand::resolve(params, &init.settings),
            environment: init.settings.environment.clone(),
            logger: init.logger,
            stop: CancellationToken::new(),
        })
    }

    /// The resolved command
    pub fn command(&self) -> &ShellCommand {
        &self.command
    }

    async fn terminate(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            self.logger.debug(format!("failed to kill process: {}", e));
        }
        if tokio::time::timeout(KILL_GRACE_PERIOD, child.wait())
            .await
            .is_err()
        {
            self.logger
                .warn("process did not exit within the grace period after kill");
        }
    }

    async fn wait(&self, ctx: &RunContext, child: &mut Child) -> ExecutionResult<ExitStatus> {
        tokio::select! {
            status = child.wait() => status.map_err(|source| ExecutionError::Spawn {
                command: self.command.command.clone(),
                source,
            }),
            _ = ctx.cancelled() => {
                self.logger.debug("context cancelled, stopping process");
                self.terminate(child).await;
                Err(ExecutionError::Cancelled)
            }
            _ = self.stop.cancelled() => {
                self.logger.debug("stop requested, stopping process");
                self.terminate(child).await;
                Err(ExecutionError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl Plugin for ShellPlugin {
    async fn call(&self, ctx: &RunContext, _runner: Arc<dyn JobRunner>) -> ExecutionResult<()> {
        if ctx.is_cancelled() || self.stop.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        self.logger.debug(format!(
            "exec: {} {} {}",
            self.command.shell, self.command.shell_exec_param, self.command.command
        ));

        let mut child = self
            .command
            .to_command(&self.environment)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: self.command.command.clone(),
                source,
            })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, self.logger.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, self.logger.clone()));
        }

        let status = match self.wait(ctx, &mut child).await {
            Ok(status) => status,
            Err(e) => {
                readers.iter().for_each(JoinHandle::abort);
                return Err(e);
            }
        };

        for reader in readers {
            let _ = reader.await;
        }

        if !status.success() {
            return Err(ExecutionError::CommandFailed(status.code()));
        }

        Ok(())
    }

    async fn cancel(&self, _ctx: &RunContext) -> ExecutionResult<()> {
        self.stop.cancel();
        Ok(())
    }
}

/// Log each line read from a child process pipe
fn forward_lines<R>(pipe: R, logger: Logger) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => logger.output(line),
                Ok(None) => break,
                Err(e) => {
                    logger.debug(format!("failed to read process output: {}", e));
                    break;
                }
            }
        }
    })
}
