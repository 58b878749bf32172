//! Backend adapter contract.
//!
//! This is the only surface the synchronization engine uses to reach a
//! physical store. Every backend exposes the same get/set/remove/enumerate
//! operations over logical keys, a change stream, and bookkeeping of the keys
//! bound to it by consumers.

use std::sync::{PoisonError, RwLock, Weak};

use kvsync_core::{BindingConfig, Value};
use tokio::sync::broadcast;

use crate::change::StoreChange;

/// Receiver of backend writes, installed with [`BackendAdapter::connect`].
///
/// The synchronization registry implements this to learn about every write a
/// backend accepts, whichever path it came through.
pub trait ChangeSink: Send + Sync {
    /// `origin` stored `value` under logical `key`.
    fn backend_wrote(&self, origin: &str, key: &str, value: &Value);

    /// `origin` removed logical `key`.
    fn backend_removed(&self, origin: &str, key: &str);
}

/// Uniform surface over one physical store.
///
/// # Identity
///
/// `name()` identifies the backend. Two adapters with the same name are
/// treated as the same backend by the engine.
///
/// # Failures
///
/// `set` and `remove` never fail from the caller's point of view: a store
/// that rejects a write is logged and the write becomes a no-op.
pub trait BackendAdapter: Send + Sync {
    /// Unique backend name, e.g. `"localStorage"`.
    fn name(&self) -> &str;

    /// Default prefix prepended to logical keys.
    fn prefix(&self) -> &str;

    /// Read the value under `key`. Absent values are `None`.
    fn get(&self, key: &str, config: &BindingConfig) -> Option<Value>;

    /// Store `value` under `key`. `Value::Null` removes the key.
    fn set(&self, key: &str, value: Value, config: &BindingConfig);

    /// Remove `key`.
    fn remove(&self, key: &str, config: &BindingConfig);

    /// Remove every entry except kvsync's own config entries.
    fn clear(&self);

    /// Visit every entry as `(value, storage_key)`.
    fn for_each(&self, visit: &mut dyn FnMut(&Value, &str));

    /// All physical keys in the store.
    fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.for_each(&mut |_, key| keys.push(key.to_string()));
        keys
    }

    /// Subscribe to changes of this backend.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    /// Install the sink notified of every accepted write and removal.
    fn connect(&self, sink: Weak<dyn ChangeSink>);

    /// Record that `key` is bound by a consumer property.
    fn track_key(&self, key: &str);

    /// Forget a bound key.
    fn untrack_key(&self, key: &str);

    /// Keys currently bound by consumer properties.
    fn tracked_keys(&self) -> Vec<String>;
}

/// Ordered set of keys bound to a backend.
#[derive(Debug, Default)]
pub struct KeyBook {
    keys: RwLock<Vec<String>>,
}

impl KeyBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, key: &str) {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    pub fn untrack(&self, key: &str) {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        keys.retain(|k| k != key);
    }

    pub fn contains(&self, key: &str) -> bool {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter().any(|k| k == key)
    }

    pub fn list(&self) -> Vec<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
