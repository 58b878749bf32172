//! Durable JSON file store.
//!
//! The whole store is one JSON object of string slots. Every write replaces
//! the file atomically (write to a sibling temp file, then rename), so a crash
//! leaves either the old or the new content. Other processes sharing the file
//! are picked up by [`RawStore::poll_external`], which reloads the file and
//! diffs it against the in-memory copy.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use kvsync_core::{Expiry, KvSyncResult, StorageError};

use crate::change::{diff_entries, RawChange};
use crate::raw::RawStore;

/// String-slot store persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    slots: RwLock<BTreeMap<String, String>>,
    /// Changes by other processes absorbed during our own writes, not yet polled.
    pending_external: Mutex<Vec<RawChange<String>>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing content if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or does not
    /// contain a JSON object of strings.
    pub fn open(path: impl AsRef<Path>) -> KvSyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let slots = load(&path)?;
        tracing::debug!(path = %path.display(), entries = slots.len(), "Opened JSON file store");
        Ok(Self {
            path,
            slots: RwLock::new(slots),
            pending_external: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, slots: &BTreeMap<String, String>) -> KvSyncResult<()> {
        let bytes = serde_json::to_vec(slots).map_err(|e| StorageError::Serialization {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| io_error(&self.path, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }

    /// Apply one slot change on top of the file's current content.
    ///
    /// The file is reloaded under the write lock so keys written by other
    /// processes since the last poll survive. Those keys are queued and
    /// reported by the next poll; the key written here is not, since this
    /// write supersedes it.
    fn write_through(&self, storage_key: &str, item: Option<String>) -> KvSyncResult<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let on_disk = load(&self.path)?;
        let mut next = on_disk.clone();

        let external: Vec<RawChange<String>> = diff_entries(&slots, &on_disk)
            .into_iter()
            .filter(|change| change.storage_key != storage_key)
            .collect();

        let changed = match item {
            Some(item) => next.insert(storage_key.to_string(), item.clone()) != Some(item),
            None => next.remove(storage_key).is_some(),
        };
        let result = if changed { self.persist(&next) } else { Ok(()) };

        // On failure the file still holds the other processes' writes only.
        *slots = if result.is_ok() { next } else { on_disk };

        if !external.is_empty() {
            tracing::debug!(
                path = %self.path.display(),
                changes = external.len(),
                "Absorbed external changes on write"
            );
            self.pending_external
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(external);
        }
        result
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        backend: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn load(path: &Path) -> KvSyncResult<BTreeMap<String, String>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::Serialization {
                key: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(io_error(path, e).into()),
    }
}

impl RawStore for JsonFileStore {
    type Item = String;

    fn kind(&self) -> &str {
        "file"
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
        self.write_through(storage_key, Some(item))
    }

    fn remove_item(&self, storage_key: &str) -> KvSyncResult<()> {
        self.write_through(storage_key, None)
    }

    fn entries(&self) -> Vec<(String, String)> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn poll_external(&self) -> Vec<RawChange<String>> {
        let mut changes = std::mem::take(
            &mut *self
                .pending_external
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let on_disk = match load(&self.path) {
            Ok(on_disk) => on_disk,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to reload JSON file store"
                );
                return changes;
            }
        };

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let fresh = diff_entries(&slots, &on_disk);
        if !fresh.is_empty() {
            *slots = on_disk;
        }
        changes.extend(fresh);
        changes
    }
}
