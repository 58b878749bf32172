//! Per-backend storage service.
//!
//! [`StorageService`] is the direct, key-oriented way into one backend:
//! reads and writes that bypass consumer properties but still flow through
//! the registry, so every unit bound to the same key sees them.

use std::sync::Arc;

use kvsync_core::{
    describe, is_compound, merge, BindingConfig, ClearType, ConsumerId, KvSyncResult,
    ValidationError, Value,
};
use kvsync_storage::{BackendAdapter, StoreChange};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::registry::Registry;
use crate::resource::Resource;

/// What a [`StorageService::clear`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearTarget {
    /// Entries whose storage key starts with the given prefix, or the
    /// backend's prefix when `None`.
    Prefix(Option<String>),
    /// Keys bound by consumer properties; only those of the given consumer
    /// when set.
    Bound(Option<ConsumerId>),
    /// Everything except kvsync's own config entries.
    All,
}

impl From<ClearType> for ClearTarget {
    fn from(clear_type: ClearType) -> Self {
        match clear_type {
            ClearType::Prefix => ClearTarget::Prefix(None),
            ClearType::Bound => ClearTarget::Bound(None),
            ClearType::All => ClearTarget::All,
        }
    }
}

/// Filtered stream of a backend's changes.
///
/// With a key filter, clears always pass: they affect every key.
pub struct ChangeStream {
    rx: broadcast::Receiver<StoreChange>,
    key: Option<String>,
    exact: bool,
}

impl ChangeStream {
    fn matches(&self, change: &StoreChange) -> bool {
        let Some(key) = &self.key else {
            return true;
        };
        let Some(storage_key) = &change.storage_key else {
            return true;
        };
        if self.exact {
            change.key.as_deref() == Some(key.as_str()) || storage_key == key
        } else {
            storage_key.contains(key.as_str())
        }
    }

    /// Wait for the next matching change. `None` once the backend is gone.
    pub async fn recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next matching change already delivered, if any.
    pub fn try_recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if self.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change stream lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Key-oriented façade over one backend.
#[derive(Clone)]
pub struct StorageService {
    registry: Registry,
    backend: Arc<dyn BackendAdapter>,
}

impl StorageService {
    /// Create the service and route the backend's changes into `registry`.
    pub fn new(registry: &Registry, backend: Arc<dyn BackendAdapter>) -> Self {
        registry.register_backend(&backend);
        Self {
            registry: registry.clone(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &Arc<dyn BackendAdapter> {
        &self.backend
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.backend.get(key, &BindingConfig::default())
    }

    pub fn set(&self, key: &str, value: Value) {
        self.backend.set(key, value, &BindingConfig::default());
    }

    /// Set with per-call options, e.g. a cookie expiry.
    pub fn set_with(&self, key: &str, value: Value, config: &BindingConfig) {
        self.backend.set(key, value, config);
    }

    /// Deep-merge `changes` into the stored value and save the result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUpdateTarget` if the stored value is a scalar.
    pub fn update(&self, key: &str, changes: Value) -> KvSyncResult<Value> {
        let current = self.get(key).unwrap_or(Value::Null);
        if !current.is_null() && !is_compound(&current) {
            return Err(ValidationError::InvalidUpdateTarget {
                key: key.to_string(),
                found: describe(&current).to_string(),
            }
            .into());
        }

        let merged = merge(current, changes);
        self.set(key, merged.clone());
        Ok(merged)
    }

    pub fn remove(&self, key: &str) {
        self.backend.remove(key, &BindingConfig::default());
    }

    /// Nested-path accessor for `key`.
    pub fn load(&self, key: &str) -> Resource {
        Resource::new(Arc::clone(&self.backend), key)
    }

    /// Subscribe to changes, optionally filtered by key.
    ///
    /// With `exact`, a change matches when its logical or storage key equals
    /// `key`; otherwise when its storage key contains `key`.
    pub fn observe(&self, key: Option<&str>, exact: bool) -> ChangeStream {
        ChangeStream {
            rx: self.backend.subscribe(),
            key: key.map(str::to_string),
            exact,
        }
    }

    /// Storage keys under the backend prefix, followed by keys bound by
    /// consumer properties.
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.backend.prefix();
        let mut keys: Vec<String> = if prefix.is_empty() {
            Vec::new()
        } else {
            self.backend
                .keys()
                .into_iter()
                .filter(|key| key.starts_with(prefix))
                .collect()
        };
        for key in self.backend.tracked_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Clear with the registry's configured default target.
    pub fn clear_default(&self) {
        self.clear(self.registry.config().clear_type.into());
    }

    pub fn clear(&self, target: ClearTarget) {
        match target {
            ClearTarget::Prefix(prefix) => {
                let prefix = prefix.unwrap_or_else(|| self.backend.prefix().to_string());
                let config = BindingConfig::with_prefix_only(prefix.clone());
                let mut removed = 0;
                for storage_key in self.backend.keys() {
                    if let Some(key) = storage_key.strip_prefix(prefix.as_str()) {
                        if storage_key.starts_with(kvsync_core::CONFIG_PREFIX) {
                            continue;
                        }
                        self.backend.remove(key, &config);
                        removed += 1;
                    }
                }
                tracing::debug!(
                    backend = self.name(),
                    prefix = %prefix,
                    removed,
                    "Cleared by prefix"
                );
            }
            ClearTarget::Bound(consumer) => {
                let keys: Vec<String> = self
                    .backend
                    .tracked_keys()
                    .into_iter()
                    .filter(|key| match consumer {
                        Some(consumer) => self
                            .registry
                            .get(key)
                            .is_some_and(|unit| unit.has_consumer(consumer)),
                        None => true,
                    })
                    .collect();

                for key in &keys {
                    let config = self
                        .registry
                        .get(key)
                        .and_then(|unit| unit.binding_config(self.name()))
                        .unwrap_or_default();
                    self.backend.remove(key, &config);
                }
                tracing::debug!(backend = self.name(), removed = keys.len(), "Cleared bound keys");
            }
            ClearTarget::All => {
                self.backend.clear();
                tracing::debug!(backend = self.name(), "Cleared all entries");
            }
        }
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoredProperty;
    use kvsync_core::{Consumer, SyncConfig};
    use kvsync_storage::{MemoryStore, SessionStorage};
    use serde_json::json;

    fn service(registry: &Registry) -> StorageService {
        let backend: Arc<dyn BackendAdapter> =
            Arc::new(SessionStorage::new("sessionStorage", MemoryStore::new(), "app_"));
        StorageService::new(registry, backend)
    }

    #[test]
    fn test_update_merges_objects() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        storage.set("user", json!({"name": "a", "tags": ["x"]}));

        let merged = storage.update("user", json!({"age": 3})).unwrap();
        assert_eq!(merged, json!({"name": "a", "tags": ["x"], "age": 3}));
        assert_eq!(storage.get("user"), Some(merged));

        assert_eq!(storage.update("fresh", json!({"a": 1})).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_update_rejects_scalar_target() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        storage.set("count", json!(5));

        let err = storage.update("count", json!({"a": 1})).unwrap_err();
        assert!(err.to_string().contains("cannot be updated"));
        assert_eq!(storage.get("count"), Some(json!(5)));
    }

    #[test]
    fn test_keys_include_prefixed_and_bound() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        storage.set("a", json!(1));
        storage
            .backend()
            .set("x", json!(1), &BindingConfig::with_prefix_only("other_"));

        let widget = Consumer::new("Widget");
        StoredProperty::bind(
            &registry,
            &widget,
            Arc::clone(storage.backend()),
            "bound",
            BindingConfig::default(),
        );

        assert_eq!(storage.keys(), vec!["app_a".to_string(), "bound".to_string()]);
    }

    #[test]
    fn test_clear_by_prefix_keeps_other_entries() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        storage.set("a", json!(1));
        storage.set("b", json!(2));
        storage
            .backend()
            .set("x", json!(1), &BindingConfig::with_prefix_only("other_"));

        storage.clear(ClearTarget::Prefix(None));
        assert_eq!(storage.backend().keys(), vec!["other_x".to_string()]);

        storage.clear(ClearTarget::Prefix(Some("other_".to_string())));
        assert!(storage.backend().keys().is_empty());
    }

    #[test]
    fn test_clear_bound_by_consumer() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        let first = Consumer::new("First");
        let second = Consumer::new("Second");

        let a = StoredProperty::bind(
            &registry,
            &first,
            Arc::clone(storage.backend()),
            "a",
            BindingConfig::default(),
        );
        let b = StoredProperty::bind(
            &registry,
            &second,
            Arc::clone(storage.backend()),
            "b",
            BindingConfig::default(),
        );
        a.set(json!(1));
        b.set(json!(2));
        storage.set("loose", json!(3));

        storage.clear(ClearTarget::Bound(Some(first.id())));
        assert_eq!(storage.get("a"), None);
        assert_eq!(storage.get("b"), Some(json!(2)));

        storage.clear(ClearTarget::Bound(None));
        assert_eq!(storage.get("b"), None);
        assert_eq!(storage.get("loose"), Some(json!(3)));
    }

    #[test]
    fn test_clear_default_uses_configured_type() {
        let registry = Registry::init(SyncConfig::new().with_clear_type(ClearType::All));
        let storage = service(&registry);
        storage
            .backend()
            .set("x", json!(1), &BindingConfig::with_prefix_only("other_"));
        storage.set("a", json!(1));

        storage.clear_default();
        assert!(storage.backend().keys().is_empty());
    }

    #[test]
    fn test_observe_filters_by_key() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        let mut all = storage.observe(None, false);
        let mut exact = storage.observe(Some("count"), true);
        let mut partial = storage.observe(Some("coun"), false);

        storage.set("count", json!(1));
        storage.set("counter", json!(2));

        assert_eq!(all.try_recv().unwrap().key.as_deref(), Some("count"));
        assert_eq!(all.try_recv().unwrap().key.as_deref(), Some("counter"));

        assert_eq!(exact.try_recv().unwrap().new_value, Some(json!(1)));
        assert!(exact.try_recv().is_none());

        assert!(partial.try_recv().is_some());
        assert!(partial.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_observe_recv_waits_for_matching_change() {
        let registry = Registry::init(SyncConfig::new());
        let storage = service(&registry);
        let mut stream = storage.observe(Some("b"), true);

        let writer = storage.clone();
        tokio::spawn(async move {
            writer.set("a", json!(1));
            writer.set("b", json!(2));
        });

        let change = stream.recv().await.unwrap();
        assert_eq!(change.key.as_deref(), Some("b"));
        assert!(change.is_internal);
    }
}
