//! Job conditions
//!
//! A condition is a shell command; the job runs only if it exits with zero.

use crate::config::Settings;
use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::RunContext;
use std::process::Stdio;
use tokio::process::Command;

/// Run a condition command and report whether it succeeded
///
/// The command is expected to be expanded already. Its output is discarded.
/// A command that cannot be started is an error, not a false condition.
pub async fn check_condition(
    command: &str,
    settings: &Settings,
    ctx: &RunContext,
) -> ExecutionResult<bool> {
    ctx.logger().debug(format!("checking condition: {}", command));

    let mut cmd = Command::new(&settings.shell);
    if !settings.shell_exec_param.is_empty() {
        cmd.arg(&settings.shell_exec_param);
    }
    cmd.arg(command)
        .current_dir(&settings.project_dir)
        .envs(settings.environment.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ExecutionError::ConditionStart {
        command: command.to_string(),
        source,
    })?;

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|source| ExecutionError::ConditionStart {
                command: command.to_string(),
                source,
            })?;
            Ok(status.success())
        }
        _ = ctx.cancelled() => {
            let _ = child.start_kill();
            Err(ExecutionError::Cancelled)
        }
    }
}
