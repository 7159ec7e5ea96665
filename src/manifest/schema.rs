//! Manifest validation
//!
//! This module checks references and task cycles before anything runs.

use crate::error::{ManifestError, ManifestResult};
use crate::manifest::types::{Job, JobExecType, Manifest};
use std::collections::HashSet;
use std::fmt;

/// A non-fatal problem found in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Where the problem is, e.g. `task 'build' job #2`
    pub location: String,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Validate a complete manifest
///
/// Returns the warnings found; broken references and cycles are errors.
pub fn validate_manifest(manifest: &Manifest) -> ManifestResult<Vec<ValidationWarning>> {
    let mut warnings = Vec::new();

    for (name, jobs) in &manifest.tasks {
        validate_jobs(manifest, &format!("task '{}'", name), jobs, &mut warnings)?;
    }
    for (name, jobs) in &manifest.mixins {
        validate_jobs(manifest, &format!("mixin '{}'", name), jobs, &mut warnings)?;
    }

    detect_circular_task_references(manifest)?;

    Ok(warnings)
}

fn validate_jobs(
    manifest: &Manifest,
    owner: &str,
    jobs: &[Job],
    warnings: &mut Vec<ValidationWarning>,
) -> ManifestResult<()> {
    for (index, job) in jobs.iter().enumerate() {
        let location = format!("{} job #{}", owner, index);

        if job.target_count() > 1 {
            warnings.push(ValidationWarning {
                location: location.clone(),
                message: format!(
                    "several targets are set, only the {} target is used",
                    kind_name(job.exec_type())
                ),
            });
        }

        match job.exec_type() {
            JobExecType::Task => {
                if let Some(task) = job.task_name.as_deref() {
                    if !manifest.tasks.contains_key(task) {
                        return Err(ManifestError::TaskNotFound(task.to_string()));
                    }
                }
            }
            JobExecType::Mixin => {
                if let Some(mixin) = job.mixin_name.as_deref() {
                    manifest.mixin(mixin)?;
                }
                if job.condition().is_some() || !job.delay.is_zero() {
                    warnings.push(ValidationWarning {
                        location,
                        message: "condition and delay are ignored on mixin references"
                            .to_string(),
                    });
                }
            }
            JobExecType::Empty => {
                warnings.push(ValidationWarning {
                    location,
                    message: "job has no plugin, task or mixin and does nothing".to_string(),
                });
            }
            JobExecType::Plugin => {}
        }
    }

    Ok(())
}

fn kind_name(kind: JobExecType) -> &'static str {
    match kind {
        JobExecType::Plugin => "plugin",
        JobExecType::Task => "task",
        JobExecType::Mixin => "mixin",
        JobExecType::Empty => "empty",
    }
}

/// Detect cycles between tasks that run each other
fn detect_circular_task_references(manifest: &Manifest) -> ManifestResult<()> {
    let mut names: Vec<&String> = manifest.tasks.keys().collect();
    names.sort();

    let mut visited = HashSet::new();
    for task_name in names {
        let mut stack = Vec::new();
        check_task_cycle(manifest, task_name, &mut visited, &mut stack)?;
    }
    Ok(())
}

/// Recursively check for cycles in task references
fn check_task_cycle(
    manifest: &Manifest,
    task_name: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> ManifestResult<()> {
    if stack.iter().any(|t| t == task_name) {
        stack.push(task_name.to_string());
        return Err(ManifestError::CyclicReference(stack.join(" -> ")));
    }

    if visited.contains(task_name) {
        return Ok(());
    }

    // Resolution inlines mixins and already rejects direct self references
    let jobs = manifest.resolve_jobs(task_name)?;

    stack.push(task_name.to_string());

    for job in &jobs {
        if job.exec_type() != JobExecType::Task {
            continue;
        }
        if let Some(subtask) = job.task_name.as_deref() {
            check_task_cycle(manifest, subtask, visited, stack)?;
        }
    }

    stack.pop();
    visited.insert(task_name.to_string());

    Ok(())
}
