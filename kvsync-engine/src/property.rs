//! Consumer-side binding of one key to one backend.
//!
//! A [`StoredProperty`] is what a consumer holds in place of a plain field:
//!
//! ```ignore
//! let count = StoredProperty::bind(&registry, &widget, local, "count", BindingConfig::default());
//! count.set(json!(0));          // first write: a stored value wins over this default
//! let current = count.get();    // cached or canonical value
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use kvsync_core::{BindingConfig, Consumer, KvSyncResult, StorageError, Value};
use kvsync_storage::BackendAdapter;

use crate::binding::UnitSpec;
use crate::registry::Registry;
use crate::tracked::Wrapped;
use crate::unit::SyncUnit;

/// A consumer property persisted under a key.
#[derive(Clone)]
pub struct StoredProperty {
    registry: Registry,
    consumer: Consumer,
    backend: Arc<dyn BackendAdapter>,
    key: String,
    name: String,
    config: BindingConfig,
}

impl StoredProperty {
    /// Bind property `name` of `consumer` to `backend`.
    ///
    /// The key is `config.key` if set, otherwise `name`.
    pub fn bind(
        registry: &Registry,
        consumer: &Consumer,
        backend: Arc<dyn BackendAdapter>,
        name: &str,
        config: BindingConfig,
    ) -> Self {
        let key = config.key.clone().unwrap_or_else(|| name.to_string());
        let property = Self {
            registry: registry.clone(),
            consumer: consumer.clone(),
            backend,
            key,
            name: name.to_string(),
            config,
        };
        property.unit();
        property
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// The live unit for this key, re-created if it was torn down.
    pub fn unit(&self) -> Arc<SyncUnit> {
        let spec = UnitSpec::new(self.key.clone())
            .with_name(format!("{}.{}", self.consumer.name(), self.name))
            .with_backend(Arc::clone(&self.backend), self.config.clone())
            .with_consumer(&self.consumer);
        self.registry.get_or_create(spec)
    }

    pub fn get(&self) -> Wrapped {
        match self.registry.get(&self.key) {
            Some(unit) => unit.read_wrapped(&self.config),
            None => self.unit().read_wrapped(&self.config),
        }
    }

    pub fn set(&self, value: Value) -> Wrapped {
        self.unit()
            .write_from(self.consumer.id(), value, &self.config)
    }

    /// Read and deserialize. Absent values deserialize from `null`.
    pub fn get_as<T: DeserializeOwned>(&self) -> KvSyncResult<T> {
        let value = self.get().into_value();
        serde_json::from_value(value).map_err(|e| {
            StorageError::Serialization {
                key: self.key.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Serialize and write.
    pub fn set_as<T: Serialize>(&self, value: &T) -> KvSyncResult<Wrapped> {
        let value = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.set(value))
    }
}

impl std::fmt::Debug for StoredProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredProperty")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("consumer", &self.consumer.id())
            .field("backend", &self.backend.name())
            .finish()
    }
}
