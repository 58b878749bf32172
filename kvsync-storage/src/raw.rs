//! Raw physical store contract.
//!
//! A raw store is a flat slot map keyed by physical storage key. It knows
//! nothing about prefixes, marshalling, or synchronization; those live in
//! [`crate::StorageAdapter`].

use crate::change::RawChange;
use kvsync_core::{Expiry, KvSyncResult};

/// A flat key/slot store.
///
/// Implementations must be thread-safe. Write failures (quota, I/O) are
/// returned as errors; the adapter decides how to surface them.
pub trait RawStore: Send + Sync + 'static {
    /// The slot type.
    type Item: Clone + PartialEq + Send + Sync + 'static;

    /// Short kind label used in logs, e.g. `"memory"`.
    fn kind(&self) -> &str;

    /// Read one slot.
    fn get_item(&self, storage_key: &str) -> Option<Self::Item>;

    /// Write one slot. `expires` is a hint that stores may ignore.
    fn set_item(
        &self,
        storage_key: &str,
        item: Self::Item,
        expires: Option<&Expiry>,
    ) -> KvSyncResult<()>;

    /// Remove one slot. Removing a missing slot is not an error.
    fn remove_item(&self, storage_key: &str) -> KvSyncResult<()>;

    /// All slots, in key order.
    fn entries(&self) -> Vec<(String, Self::Item)>;

    /// Remove every slot whose key satisfies `filter`.
    fn clear_where(&self, filter: &dyn Fn(&str) -> bool) -> KvSyncResult<()> {
        for (key, _) in self.entries() {
            if filter(&key) {
                self.remove_item(&key)?;
            }
        }
        Ok(())
    }

    /// Changes made by other parties since the last poll.
    ///
    /// Stores without an external writer return nothing.
    fn poll_external(&self) -> Vec<RawChange<Self::Item>> {
        Vec::new()
    }
}
