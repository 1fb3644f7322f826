//! Name-keyed set of render backends with a default route.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reelforge_core::variation::{JobSpec, DIM_ENGINE};

use crate::backend::RenderBackend;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No render backend registered for engine '{0}'")]
    UnknownEngine(String),

    #[error("No render backends are registered")]
    NoBackends,
}

/// Routes jobs to backends.
///
/// A job whose spec carries an `engine` dimension goes to the backend with
/// that name; every other job goes to the default backend (the first one
/// registered unless overridden).
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn RenderBackend>>,
    default: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own name, replacing any previous one.
    pub fn register(mut self, backend: Arc<dyn RenderBackend>) -> Self {
        let name = backend.name().to_string();
        tracing::info!(backend = %name, model = ?backend.completion_model(), "Registered render backend");
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.backends.insert(name, backend);
        self
    }

    /// Route unqualified jobs to `name`.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RenderBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Pick the backend for a job.
    pub fn resolve(&self, spec: &JobSpec) -> Result<Arc<dyn RenderBackend>, RegistryError> {
        match spec.dimension(DIM_ENGINE) {
            Some(engine) => self
                .get(engine)
                .ok_or_else(|| RegistryError::UnknownEngine(engine.to_string())),
            None => self
                .default
                .as_deref()
                .and_then(|name| self.get(name))
                .ok_or(RegistryError::NoBackends),
        }
    }

    /// Poll interval for a backend, or `None` if it is immediate or unknown.
    pub fn poll_interval(&self, name: &str) -> Option<Duration> {
        self.backends
            .get(name)
            .and_then(|b| b.completion_model().poll_interval())
    }
}
