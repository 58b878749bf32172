//! Registry of synchronization units.
//!
//! The registry maps each key to its single [`SyncUnit`]. It is created with
//! [`Registry::init`] and handed to everything that needs it; cloning a
//! `Registry` yields another handle to the same map.
//!
//! The registry is also the change sink of every backend bound through it:
//!
//! ```text
//! backend X accepts a write for k ──→ unit(k).invalidate()
//!                                  └→ unit(k).propagate(value, origin = X)
//! backend X removes k ─────────────→ unit(k).invalidate()
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use kvsync_core::{SyncConfig, Value};
use kvsync_storage::{BackendAdapter, ChangeSink};

use crate::binding::UnitSpec;
use crate::unit::SyncUnit;

pub(crate) struct RegistryInner {
    config: SyncConfig,
    units: RwLock<HashMap<String, Arc<SyncUnit>>>,
}

impl RegistryInner {
    fn unit(&self, key: &str) -> Option<Arc<SyncUnit>> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Remove `unit` if it is still the registered unit for its key.
    pub(crate) fn forget(&self, unit: &SyncUnit) -> bool {
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        match units.get(unit.key()) {
            Some(existing) if std::ptr::eq(Arc::as_ptr(existing), unit) => {
                units.remove(unit.key());
                true
            }
            _ => false,
        }
    }

    /// Install this registry as `backend`'s change sink. A backend reports to
    /// one sink; connecting again replaces it.
    pub(crate) fn connect_backend(self: &Arc<Self>, backend: &Arc<dyn BackendAdapter>) {
        let sink: Weak<dyn ChangeSink> = Arc::downgrade(self) as Weak<dyn ChangeSink>;
        backend.connect(sink);
        tracing::trace!(backend = backend.name(), "Backend connected to registry");
    }
}

impl ChangeSink for RegistryInner {
    fn backend_wrote(&self, origin: &str, key: &str, value: &Value) {
        let Some(unit) = self.unit(key) else {
            return;
        };
        unit.invalidate();
        unit.propagate(value, Some(origin));
    }

    fn backend_removed(&self, _origin: &str, key: &str) {
        if let Some(unit) = self.unit(key) {
            unit.invalidate();
        }
    }
}

/// Process-scoped map of key to [`SyncUnit`].
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn init(config: SyncConfig) -> Self {
        tracing::debug!(
            prefix = %config.prefix,
            mutate_objects = config.mutate_objects,
            "Registry initialized"
        );
        Self {
            inner: Arc::new(RegistryInner {
                config,
                units: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Route `backend`'s change notifications into this registry.
    pub fn register_backend(&self, backend: &Arc<dyn BackendAdapter>) {
        self.inner.connect_backend(backend);
    }

    /// Look up the unit for `spec.key`, creating it if absent, then merge the
    /// spec's bindings and consumers into it. Never replaces an existing unit.
    pub fn get_or_create(&self, spec: UnitSpec) -> Arc<SyncUnit> {
        let (unit, created) = {
            let mut units = self
                .inner
                .units
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match units.get(&spec.key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let name = spec.name.clone().unwrap_or_else(|| spec.key.clone());
                    let unit = Arc::new(SyncUnit::new(
                        spec.key.clone(),
                        name,
                        Arc::downgrade(&self.inner),
                        self.inner.config.mutate_objects,
                    ));
                    units.insert(spec.key.clone(), Arc::clone(&unit));
                    (unit, true)
                }
            }
        };

        if created {
            tracing::debug!(key = %spec.key, "Sync unit created");
        } else if !spec.bindings.is_empty() || !spec.consumers.is_empty() {
            tracing::debug!(key = %spec.key, "Merging into existing sync unit");
        }

        for binding in spec.bindings {
            unit.attach_backend(binding);
        }
        for consumer in &spec.consumers {
            unit.attach_consumer(consumer);
        }
        unit
    }

    pub fn get(&self, key: &str) -> Option<Arc<SyncUnit>> {
        self.inner.unit(key)
    }

    /// Remove exactly `unit`. A different unit registered under the same key
    /// is left alone.
    pub fn remove(&self, unit: &Arc<SyncUnit>) -> bool {
        self.inner.forget(unit)
    }

    pub fn len(&self) -> usize {
        self.inner
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Dispose every unit and empty the registry.
    pub fn teardown(&self) {
        let units: Vec<Arc<SyncUnit>> = {
            let mut units = self
                .inner
                .units
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            units.drain().map(|(_, unit)| unit).collect()
        };

        let count = units.len();
        for unit in units {
            unit.dispose();
        }
        tracing::debug!(units = count, "Registry torn down");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("units", &self.keys())
            .finish()
    }
}
