//! Job list resolution
//!
//! Turns a task name into the flat job list the runner executes. Mixin jobs are
//! inlined here; task jobs are left for the runner to recurse into at dispatch.

use crate::error::{ManifestError, ManifestResult};
use crate::manifest::types::{Job, JobExecType, Manifest};
use tracing::warn;

/// A task or mixin on the resolution stack
#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Task(String),
    Mixin(String),
}

impl Frame {
    fn label(&self) -> String {
        match self {
            Frame::Task(name) => format!("task '{}'", name),
            Frame::Mixin(name) => format!("mixin '{}'", name),
        }
    }
}

/// An inlined job together with the task entry it came from
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    /// Position of the originating entry in the task's own job list
    pub entry: usize,
    /// Mixin referenced by that entry, if the job was inlined from one
    pub mixin: Option<String>,
    pub job: Job,
}

impl ResolvedJob {
    /// Description naming the mixin an inlined job came from
    pub fn format_description(&self) -> String {
        match &self.mixin {
            Some(mixin) => format!("{} (mixin '{}')", self.job.format_description(), mixin),
            None => self.job.format_description(),
        }
    }
}

impl Manifest {
    /// Resolve a task into its ordered, fully inlined job list
    pub fn resolve_jobs(&self, task_name: &str) -> ManifestResult<Vec<Job>> {
        Ok(self
            .resolve_entries(task_name)?
            .into_iter()
            .map(|resolved| resolved.job)
            .collect())
    }

    /// Like [`Manifest::resolve_jobs`], keeping track of each job's task entry
    pub fn resolve_entries(&self, task_name: &str) -> ManifestResult<Vec<ResolvedJob>> {
        let jobs = self
            .tasks
            .get(task_name)
            .ok_or_else(|| ManifestError::TaskNotFound(task_name.to_string()))?;

        let mut stack = vec![Frame::Task(task_name.to_string())];
        let mut resolved = Vec::with_capacity(jobs.len());
        for (entry, job) in jobs.iter().enumerate() {
            let mixin = match job.exec_type() {
                JobExecType::Mixin => job.mixin_name.clone(),
                _ => None,
            };

            let mut inlined = Vec::new();
            self.inline_jobs(std::slice::from_ref(job), &mut stack, &mut inlined)?;
            resolved.extend(inlined.into_iter().map(|inner| ResolvedJob {
                entry,
                mixin: mixin.clone(),
                job: inner,
            }));
        }
        Ok(resolved)
    }

    /// Get a mixin's job list
    pub fn mixin(&self, name: &str) -> ManifestResult<&[Job]> {
        self.mixins
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ManifestError::MixinNotFound(name.to_string()))
    }

    fn inline_jobs(
        &self,
        jobs: &[Job],
        stack: &mut Vec<Frame>,
        resolved: &mut Vec<Job>,
    ) -> ManifestResult<()> {
        for job in jobs {
            match job.exec_type() {
                JobExecType::Mixin => {
                    // exec_type() only returns Mixin when mixin_name is set
                    let Some(mixin_name) = job.mixin_name.as_deref() else {
                        continue;
                    };
                    let frame = Frame::Mixin(mixin_name.to_string());
                    if stack.contains(&frame) {
                        return Err(cycle_error(stack, &frame));
                    }

                    if job.condition().is_some() || !job.delay.is_zero() {
                        warn!(
                            mixin = mixin_name,
                            "condition and delay are not applied to mixin references"
                        );
                    }

                    let mixin_jobs = self.mixin(mixin_name)?;
                    let merged: Vec<Job> = mixin_jobs
                        .iter()
                        .map(|inner| merge_mixin_vars(job, inner))
                        .collect();

                    stack.push(frame);
                    self.inline_jobs(&merged, stack, resolved)?;
                    stack.pop();
                }
                JobExecType::Task => {
                    if let Some(task_name) = job.task_name.as_deref() {
                        let frame = Frame::Task(task_name.to_string());
                        if stack.contains(&frame) {
                            return Err(cycle_error(stack, &frame));
                        }
                    }
                    resolved.push(job.clone());
                }
                JobExecType::Plugin | JobExecType::Empty => resolved.push(job.clone()),
            }
        }

        Ok(())
    }
}

/// Copy a mixin job, layering the referencing job's vars underneath its own
fn merge_mixin_vars(reference: &Job, inner: &Job) -> Job {
    let mut job = inner.clone();
    for (key, value) in &reference.vars {
        job.vars
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    job
}

fn cycle_error(stack: &[Frame], repeated: &Frame) -> ManifestError {
    let mut path: Vec<String> = stack.iter().map(Frame::label).collect();
    path.push(repeated.label());
    ManifestError::CyclicReference(path.join(" -> "))
}
