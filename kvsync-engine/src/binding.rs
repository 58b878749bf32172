//! Backend bindings and unit specs.

use std::fmt;
use std::sync::Arc;

use kvsync_core::{BindingConfig, Consumer};
use kvsync_storage::BackendAdapter;

/// One backend holding a key, with the options it was bound with.
#[derive(Clone)]
pub struct BackendBinding {
    pub backend: Arc<dyn BackendAdapter>,
    pub config: BindingConfig,
}

impl BackendBinding {
    pub fn new(backend: Arc<dyn BackendAdapter>, config: BindingConfig) -> Self {
        Self { backend, config }
    }

    /// Name of the bound backend; bindings are unique per name within a unit.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

impl fmt::Debug for BackendBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendBinding")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Candidate description of a sync unit, merged into the registry by
/// [`crate::Registry::get_or_create`].
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub key: String,
    pub name: Option<String>,
    pub consumers: Vec<Consumer>,
    pub bindings: Vec<BackendBinding>,
}

impl UnitSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            consumers: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Set the diagnostic name. Defaults to the key.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_consumer(mut self, consumer: &Consumer) -> Self {
        self.consumers.push(consumer.clone());
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn BackendAdapter>, config: BindingConfig) -> Self {
        self.bindings.push(BackendBinding::new(backend, config));
        self
    }
}
