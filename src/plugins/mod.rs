//! Plugin protocol and registry
//!
//! A plugin is the executable target of a job. The runner looks plugins up by
//! name in a [`PluginRegistry`], builds one instance per job invocation, and
//! drives it through the [`Plugin`] trait.

pub mod shell;
pub mod watch;

use crate::config::{Settings, Storage};
use crate::error::{ExecutionError, ExecutionResult, ManifestError, ManifestResult};
use crate::logging::Logger;
use crate::manifest::{Job, Manifest, Params};
use crate::runner::RunContext;
use crate::scope::Scope;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An executable job target
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Perform the job
    ///
    /// Implementations must watch `ctx` for cancellation, release what they
    /// own and return promptly once it fires.
    async fn call(&self, ctx: &RunContext, runner: Arc<dyn JobRunner>) -> ExecutionResult<()>;

    /// Stop this instance without cancelling the context tree
    async fn cancel(&self, ctx: &RunContext) -> ExecutionResult<()>;
}

/// The part of the runner plugins may call back into
pub trait JobRunner: Send + Sync {
    /// Start a job in the background; its result is reported through `ctx`
    fn run_job(&self, job: Job, ctx: RunContext);
}

/// Everything a factory needs to build a plugin instance
#[derive(Debug, Clone)]
pub struct PluginInit {
    /// Registered plugin name
    pub name: String,
    /// Raw job parameters
    pub params: Params,
    /// Variable scope of the job
    pub scope: Scope,
    /// Invocation settings
    pub settings: Arc<Settings>,
    /// Logger of the job
    pub logger: Logger,
}

impl PluginInit {
    /// Expand all parameters and decode them
    pub fn decode<T: DeserializeOwned>(&self) -> ExecutionResult<T> {
        self.decode_from(&self.params)
    }

    /// Expand and decode a specific parameter mapping
    pub fn decode_from<T: DeserializeOwned>(&self, params: &Params) -> ExecutionResult<T> {
        let expanded = self.scope.expand_value(&Value::Mapping(params.clone()))?;
        serde_yaml::from_value(expanded)
            .map_err(|e| self.error(format!("failed to read configuration: {}", e)))
    }

    /// Initialization error for this plugin
    pub fn error(&self, message: impl Into<String>) -> ExecutionError {
        ExecutionError::PluginInit {
            plugin: self.name.clone(),
            message: message.into(),
        }
    }
}

/// Constructor registered under a plugin name
pub type PluginFactory =
    Arc<dyn Fn(PluginInit) -> ExecutionResult<Arc<dyn Plugin>> + Send + Sync>;

/// Name to factory mapping, filled before a run and read-only during it
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `shell` and `watch` plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(shell::PLUGIN_NAME, |init| {
            Ok(Arc::new(shell::ShellPlugin::new(init)?) as Arc<dyn Plugin>)
        });
        registry.register(watch::PLUGIN_NAME, |init| {
            Ok(Arc::new(watch::WatchPlugin::new(init)?) as Arc<dyn Plugin>)
        });
        registry
    }

    /// Register a factory, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(PluginInit) -> ExecutionResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Look a factory up
    pub fn get(&self, name: &str) -> Option<&PluginFactory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a plugin instance
    pub fn instantiate(&self, init: PluginInit) -> ExecutionResult<Arc<dyn Plugin>> {
        let factory = self
            .get(&init.name)
            .ok_or_else(|| ExecutionError::PluginNotFound(init.name.clone()))?;
        factory(init)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

/// Turns a plugin URI into registry entries
pub trait PluginImporter {
    fn import(
        &self,
        uri: &str,
        storage: &Storage,
        registry: &mut PluginRegistry,
    ) -> ManifestResult<()>;
}

/// Importer for builds without external plugin support
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedImporter;

impl PluginImporter for UnsupportedImporter {
    fn import(
        &self,
        uri: &str,
        _storage: &Storage,
        _registry: &mut PluginRegistry,
    ) -> ManifestResult<()> {
        Err(ManifestError::UnsupportedImport(uri.to_string()))
    }
}

/// Expand and import every plugin URI listed in the manifest
pub fn import_plugins(
    manifest: &Manifest,
    settings: &Settings,
    importer: &dyn PluginImporter,
    registry: &mut PluginRegistry,
) -> ExecutionResult<()> {
    let scope =
        Scope::new(settings.environment.clone()).with_globals(Arc::new(manifest.vars.clone()));

    for uri in &manifest.plugins {
        let expanded = scope.expand(uri)?;
        importer.import(&expanded, &settings.storage, registry)?;
    }

    Ok(())
}
