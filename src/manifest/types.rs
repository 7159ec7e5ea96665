//! Core manifest types
//!
//! This module defines the data structures that represent a gantry.yaml manifest.

use crate::scope::Vars;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::time::Duration;

/// An ordered list of jobs making up a task
pub type Task = Vec<Job>;

/// A reusable ordered list of jobs, inlined wherever it is referenced
pub type Mixin = Vec<Job>;

/// Free-form parameters passed to a job's target
pub type Params = Mapping;

/// Top-level manifest structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Manifest {
    /// Global variables
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        deserialize_with = "deserialize_vars"
    )]
    pub vars: Vars,

    /// Plugin import URIs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,

    /// Named mixins
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mixins: HashMap<String, Mixin>,

    /// Named tasks
    #[serde(default)]
    pub tasks: HashMap<String, Task>,
}

/// How a job is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExecType {
    /// No target set
    Empty,
    /// Runs a plugin
    Plugin,
    /// Runs another task
    Task,
    /// Expands to a mixin's jobs
    Mixin,
}

/// A single job in a task
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Job {
    /// Shell command that must succeed for the job to run
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Job description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Task to run
    #[serde(rename = "run", default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    /// Plugin that handles this job
    #[serde(rename = "plugin", default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,

    /// Mixin this job expands to
    #[serde(rename = "mixin", default, skip_serializing_if = "Option::is_none")]
    pub mixin_name: Option<String>,

    /// Delay before the job starts, written in milliseconds
    #[serde(
        default,
        with = "delay_millis",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub delay: Duration,

    /// Job-local variables
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        deserialize_with = "deserialize_vars"
    )]
    pub vars: Vars,

    /// Parameters for the job's target
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub params: Params,
}

impl Job {
    /// Execution type of the job
    ///
    /// Targets are checked in the order plugin, task, mixin; when several are
    /// set only the first one found is used.
    pub fn exec_type(&self) -> JobExecType {
        if self.plugin_name.is_some() {
            return JobExecType::Plugin;
        }

        if self.task_name.is_some() {
            return JobExecType::Task;
        }

        if self.mixin_name.is_some() {
            return JobExecType::Mixin;
        }

        JobExecType::Empty
    }

    /// Number of targets set on this job
    pub fn target_count(&self) -> usize {
        [&self.plugin_name, &self.task_name, &self.mixin_name]
            .iter()
            .filter(|t| t.is_some())
            .count()
    }

    /// Condition command, if a non-blank one is set
    pub fn condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Check if description is available
    pub fn has_description(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// Description, falling back to the plugin, task or mixin name
    pub fn format_description(&self) -> String {
        if let Some(desc) = self.description.as_deref().filter(|d| !d.is_empty()) {
            return desc.to_string();
        }

        [&self.plugin_name, &self.task_name, &self.mixin_name]
            .into_iter()
            .flatten()
            .next()
            .cloned()
            .unwrap_or_default()
    }

    /// Build a plugin job
    pub fn plugin(name: impl Into<String>, params: Params) -> Self {
        Job {
            plugin_name: Some(name.into()),
            params,
            ..Default::default()
        }
    }

    /// Build a job running another task
    pub fn task(name: impl Into<String>) -> Self {
        Job {
            task_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Build a job expanding to a mixin
    pub fn mixin(name: impl Into<String>) -> Self {
        Job {
            mixin_name: Some(name.into()),
            ..Default::default()
        }
    }
}

mod delay_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(delay.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer)
            .map(|ms| Duration::from_millis(ms.unwrap_or_default()))
    }
}

/// Custom deserializer for variables that accepts any scalar value
fn deserialize_vars<'de, D>(deserializer: D) -> Result<Vars, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(Vars::new()),
        Value::Mapping(map) => {
            let mut vars = Vars::with_capacity(map.len());
            for (key, item) in map {
                let key = scalar_to_string(key)
                    .ok_or_else(|| D::Error::custom("variable names must be scalars"))?;
                let item = scalar_to_string(item).ok_or_else(|| {
                    D::Error::custom(format!("variable '{}' must be a scalar value", key))
                })?;
                vars.insert(key, item);
            }
            Ok(vars)
        }
        _ => Err(D::Error::custom("vars must be a mapping")),
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
