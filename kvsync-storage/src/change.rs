//! Change notifications emitted by backends.

use chrono::Utc;
use kvsync_core::{Timestamp, Value};
use std::collections::BTreeMap;

/// A change to one key (or, for a clear, the whole store) of a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    /// Name of the backend that changed.
    pub storage: String,
    /// Logical key, without the backend prefix. `None` for a clear.
    pub key: Option<String>,
    /// Physical key inside the store. `None` for a clear.
    pub storage_key: Option<String>,
    /// Value before the change.
    pub old_value: Option<Value>,
    /// Value after the change. `None` for a removal.
    pub new_value: Option<Value>,
    /// False when the change came from outside this process's adapter.
    pub is_internal: bool,
    /// When the change was observed.
    pub timestamp: Timestamp,
}

impl StoreChange {
    pub fn internal(
        storage: &str,
        key: &str,
        storage_key: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            storage: storage.to_string(),
            key: Some(key.to_string()),
            storage_key: Some(storage_key.to_string()),
            old_value,
            new_value,
            is_internal: true,
            timestamp: Utc::now(),
        }
    }

    pub fn cleared(storage: &str) -> Self {
        Self {
            storage: storage.to_string(),
            key: None,
            storage_key: None,
            old_value: None,
            new_value: None,
            is_internal: true,
            timestamp: Utc::now(),
        }
    }

    /// Mark the change as coming from outside this adapter.
    pub fn external(mut self) -> Self {
        self.is_internal = false;
        self
    }

    /// Whether this change removed the key (or cleared the store).
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}

/// A change detected inside a raw store, before unmarshalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange<T> {
    pub storage_key: String,
    pub old: Option<T>,
    pub new: Option<T>,
}

/// Compute per-key changes between two snapshots of a store.
pub fn diff_entries<T: Clone + PartialEq>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
) -> Vec<RawChange<T>> {
    let mut changes = Vec::new();

    for (key, value) in new {
        let previous = old.get(key);
        if previous != Some(value) {
            changes.push(RawChange {
                storage_key: key.clone(),
                old: previous.cloned(),
                new: Some(value.clone()),
            });
        }
    }

    for (key, value) in old {
        if !new.contains_key(key) {
            changes.push(RawChange {
                storage_key: key.clone(),
                old: Some(value.clone()),
                new: None,
            });
        }
    }

    changes
}
