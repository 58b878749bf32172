//! In-memory raw stores.
//!
//! [`MemoryStore`] holds string slots and stands in for a session store; it
//! can enforce a byte quota and can simulate writes from another execution
//! context. [`ValueStore`] holds values directly for the shared store.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use kvsync_core::{Expiry, KvSyncResult, StorageError, Value};

use crate::change::RawChange;
use crate::raw::RawStore;

/// String-slot store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<BTreeMap<String, String>>,
    /// Maximum total size of keys plus values, in bytes.
    quota_bytes: Option<usize>,
    /// Writes made through [`MemoryStore::external_write`], not yet polled.
    pending_external: Mutex<Vec<RawChange<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes growing it past `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Write a slot as another execution context would.
    ///
    /// The write bypasses the adapter and is reported by the next
    /// [`RawStore::poll_external`]. `None` removes the slot.
    pub fn external_write(&self, storage_key: &str, item: Option<String>) {
        let old = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            match &item {
                Some(item) => slots.insert(storage_key.to_string(), item.clone()),
                None => slots.remove(storage_key),
            }
        };

        if old == item {
            return;
        }
        self.pending_external
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RawChange {
                storage_key: storage_key.to_string(),
                old,
                new: item,
            });
    }
}

impl RawStore for MemoryStore {
    type Item = String;

    fn kind(&self) -> &str {
        "memory"
    }

    fn get_item(&self, storage_key: &str) -> Option<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(storage_key).cloned()
    }

    fn set_item(
        &self,
        storage_key: &str,
        item: String,
        _expires: Option<&Expiry>,
    ) -> KvSyncResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(limit) = self.quota_bytes {
            let used: usize = slots.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = slots
                .get(storage_key)
                .map(|v| storage_key.len() + v.len())
                .unwrap_or(0);
            let after = used - replaced + storage_key.len() + item.len();
            if after > limit {
                return Err(StorageError::QuotaExceeded {
                    backend: self.kind().to_string(),
                    used: after,
                    limit,
                }
                .into());
            }
        }

        slots.insert(storage_key.to_string(), item);
        Ok(())
    }

    fn remove_item(&self, storage_key: &str) -> KvSyncResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(storage_key);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn poll_external(&self) -> Vec<RawChange<String>> {
        std::mem::take(&mut *self.pending_external.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Value-slot store held in process memory.
#[derive(Debug, Default)]
pub struct ValueStore {
    slots: RwLock<BTreeMap<String, Value>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawStore for ValueStore {
    type Item = Value;

    fn kind(&self) -> &str {
        "shared"
    }

    fn get_item(&self, storage_key: &str) -> Option<Value> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(storage_key).cloned()
    }

    fn set_item(
        &self,
        storage_key: &str,
        item: Value,
        _expires: Option<&Expiry>,
    ) -> KvSyncResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(storage_key.to_string(), item);
        Ok(())
    }

    fn remove_item(&self, storage_key: &str) -> KvSyncResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(storage_key);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, Value)> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
