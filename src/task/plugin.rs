//! Plugin registry: configuration key to task factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::{Dependencies, TaskRef};
use crate::error::SetupError;

/// Inputs handed to a factory.
pub struct TaskSetup<'a> {
    /// Plugin key that selected the factory.
    pub key: &'a str,
    /// Scoped singletons of this computation.
    pub dependencies: &'a Dependencies,
    /// Resolved configuration document, for document-based configurations.
    pub document: Option<&'a Value>,
    /// Extra library names carried by the configuration.
    pub libraries: &'a [String],
}

/// Builds a task from a [`TaskSetup`].
pub type TaskFactory = Arc<dyn Fn(&TaskSetup<'_>) -> Result<TaskRef, SetupError> + Send + Sync>;

/// Mapping from plugin key to factory, assembled at node startup.
///
/// ```
/// use clustervisor::{PluginRegistry, TaskFn, TaskError};
/// use tokio_util::sync::CancellationToken;
///
/// let plugins = PluginRegistry::new().with("noop", |_setup| {
///     Ok(TaskFn::arc("noop", |_ctx: CancellationToken| async { Ok::<_, TaskError>(()) }))
/// });
/// assert!(plugins.contains("noop"));
/// ```
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, TaskFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&TaskSetup<'_>) -> Result<TaskRef, SetupError> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&TaskSetup<'_>) -> Result<TaskRef, SetupError> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Runs the factory registered for `setup.key`.
    ///
    /// # Errors
    /// [`SetupError::UnknownPlugin`] for an unregistered key, or whatever the factory returns.
    pub fn build(&self, setup: &TaskSetup<'_>) -> Result<TaskRef, SetupError> {
        let factory = self
            .factories
            .get(setup.key)
            .ok_or_else(|| SetupError::UnknownPlugin(setup.key.to_string()))?;
        factory(setup)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}
