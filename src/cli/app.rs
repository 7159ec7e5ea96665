//! Main CLI application

use crate::config::{Settings, Storage, StorageKind, ENV_FILE_NAME};
use crate::error::ExecutionError;
use crate::logging::{init_logging, Verbosity};
use crate::manifest::{parse_manifest_auto, parse_manifest_file, validate_manifest, Manifest};
use crate::plugins::{import_plugins, PluginRegistry, UnsupportedImporter};
use crate::runner::{TaskRunner, CANCEL_GRACE_PERIOD};
use crate::ui;
use anyhow::{Context as _, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use futures::stream::{self, Stream, StreamExt};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Guidance attached to manifest-related failures
pub const MANIFEST_HINT: &str =
    "Check if 'gantry.yaml' file exists or has correct syntax and check all import statements";

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("gantry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A declarative task runner")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the gantry.yaml manifest")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a task")
                .arg(Arg::new("task").value_name("TASK").required(true)),
        )
        .subcommand(Command::new("ls").about("List tasks"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        )
        .subcommand(Command::new("clean").about("Delete downloaded plugins"))
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Run the CLI application with the process arguments
pub fn run() -> Result<()> {
    run_from(std::env::args_os())
}

/// Run the CLI application with provided arguments
pub fn run_from<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command().get_matches_from(args);
    init_logging(get_verbosity(&matches));

    let file = matches.get_one::<PathBuf>("file");
    match matches.subcommand() {
        Some(("run", sub)) => {
            let task = sub
                .get_one::<String>("task")
                .context("missing task name")?;
            run_task(file, task)
        }
        Some(("ls", _)) => list_tasks(file),
        Some(("completions", sub)) => {
            let shell = sub
                .get_one::<Shell>("shell")
                .copied()
                .context("missing shell name")?;
            clap_complete::generate(shell, &mut build_command(), "gantry", &mut io::stdout());
            Ok(())
        }
        Some(("clean", _)) => clean(),
        _ => Ok(()),
    }
}

/// Load the manifest from `--file` or by searching upwards
fn load_manifest(file: Option<&PathBuf>) -> Result<(Manifest, PathBuf)> {
    let loaded = match file {
        Some(path) => parse_manifest_file(path).map(|manifest| (manifest, path.clone())),
        None => parse_manifest_auto(),
    };
    let (manifest, path) = loaded.context(MANIFEST_HINT)?;

    for warning in validate_manifest(&manifest).context(MANIFEST_HINT)? {
        ui::warning(&warning.to_string());
    }

    Ok((manifest, path))
}

fn load_settings(manifest_path: PathBuf) -> Result<Settings> {
    let current_dir = std::env::current_dir().context("failed to get current directory")?;
    let settings = Settings::new(current_dir).with_manifest_path(manifest_path);
    let env_file = settings.manifest_dir().join(ENV_FILE_NAME);
    settings
        .with_env_file(&env_file)
        .with_context(|| format!("failed to load '{}'", env_file.display()))
}

fn run_task(file: Option<&PathBuf>, task: &str) -> Result<()> {
    let (manifest, manifest_path) = load_manifest(file)?;
    let settings = load_settings(manifest_path)?;

    let mut registry = PluginRegistry::with_builtins();
    import_plugins(&manifest, &settings, &UnsupportedImporter, &mut registry)
        .context(MANIFEST_HINT)?;

    let runner = TaskRunner::new(manifest, Arc::new(settings), Arc::new(registry));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async {
        tokio::spawn(stop_on_interrupts(runner.clone(), ctrl_c_stream()));

        let result = runner.run_task(task).await;
        if tokio::time::timeout(CANCEL_GRACE_PERIOD, runner.join())
            .await
            .is_err()
        {
            tracing::warn!("some jobs did not finish in time");
        }
        result
    });

    match result {
        Ok(()) => {
            ui::success(&format!("Task '{}' ran successfully", task));
            Ok(())
        }
        Err(e) if matches!(e.root_cause(), ExecutionError::Manifest(_)) => {
            Err(anyhow::Error::new(e).context(MANIFEST_HINT))
        }
        Err(e) => Err(e.into()),
    }
}

/// Stream of Ctrl-C presses; ends if the handler cannot be installed
fn ctrl_c_stream() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
}

/// Stop the runner on every interrupt; returns how many were seen
async fn stop_on_interrupts(runner: TaskRunner, interrupts: impl Stream<Item = ()>) -> usize {
    let mut interrupts = std::pin::pin!(interrupts);
    let mut seen = 0;
    while interrupts.next().await.is_some() {
        seen += 1;
        if seen == 1 {
            tracing::warn!("interrupted, stopping");
        } else {
            tracing::warn!(count = seen, "interrupted again, still stopping");
        }
        runner.stop();
    }
    seen
}

fn list_tasks(file: Option<&PathBuf>) -> Result<()> {
    let (manifest, _) = load_manifest(file)?;

    if manifest.tasks.is_empty() {
        println!("No tasks defined");
        return Ok(());
    }

    let mut names: Vec<&String> = manifest.tasks.keys().collect();
    names.sort();

    println!("Tasks:");
    for name in names {
        let description = manifest.tasks[name]
            .iter()
            .find(|job| job.has_description())
            .map(|job| job.format_description())
            .unwrap_or_default();
        println!("{}", ui::task_line(name, &description));
    }

    Ok(())
}

fn clean() -> Result<()> {
    let storage = Storage::from_env().context("failed to locate plugin storage")?;
    let plugins = storage.path(StorageKind::Plugins, &[]);
    storage
        .delete(StorageKind::Plugins, &[])
        .with_context(|| format!("failed to delete '{}'", plugins.display()))?;
    ui::success(&format!("Removed {}", plugins.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_verbosity_normal() {
        let matches = build_command().get_matches_from(vec!["gantry", "ls"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Normal);
    }

    #[test]
    fn test_get_verbosity_flags() {
        let matches = build_command().get_matches_from(vec!["gantry", "-q", "ls"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Quiet);

        let matches = build_command().get_matches_from(vec!["gantry", "ls", "-v"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Verbose);

        let matches = build_command().get_matches_from(vec!["gantry", "-s", "-v", "ls"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Silent);
    }

    #[test]
    fn test_run_requires_task() {
        assert!(build_command()
            .try_get_matches_from(vec!["gantry", "run"])
            .is_err());

        let matches = build_command()
            .try_get_matches_from(vec!["gantry", "run", "build", "--file", "x.yaml"])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("file"),
            Some(&PathBuf::from("x.yaml"))
        );
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(sub.get_one::<String>("task").unwrap(), "build");
    }

    #[test]
    fn test_completions_shell_is_parsed() {
        let matches = build_command()
            .try_get_matches_from(vec!["gantry", "completions", "bash"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<Shell>("shell"), Some(&Shell::Bash));
    }

    #[tokio::test]
    async fn test_every_interrupt_stops_the_runner() {
        let runner = TaskRunner::new(
            Manifest::default(),
            Arc::new(Settings::new(".")),
            Arc::new(PluginRegistry::new()),
        );

        let seen = stop_on_interrupts(runner.clone(), stream::iter([(), (), ()])).await;
        assert_eq!(seen, 3);
        assert!(runner.is_stopped());
    }

    #[tokio::test]
    async fn test_interrupt_listener_keeps_waiting() {
        let runner = TaskRunner::new(
            Manifest::default(),
            Arc::new(Settings::new(".")),
            Arc::new(PluginRegistry::new()),
        );
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let interrupts = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|()| ((), rx))
        });
        let listener = tokio::spawn(stop_on_interrupts(runner.clone(), interrupts));

        tx.send(()).unwrap();
        tx.send(()).unwrap();
        tokio::task::yield_now().await;
        assert!(!listener.is_finished());

        drop(tx);
        assert_eq!(listener.await.unwrap(), 2);
        assert!(runner.is_stopped());
    }

    #[test]
    fn test_command_is_consistent() {
        build_command().debug_assert();
    }
}
