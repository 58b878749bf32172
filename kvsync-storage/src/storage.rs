//! Generic backend adapter over a raw store.
//!
//! [`StorageAdapter`] turns any [`RawStore`] into a [`BackendAdapter`]:
//! it maps logical keys to `prefix + key`, marshals values with a
//! [`Marshal`] strategy, emits [`StoreChange`] events, reports accepted writes
//! to the connected [`ChangeSink`], and migrates entries left under a
//! previous prefix.
//!
//! # Prefix migration
//!
//! ```text
//! open(store, prefix = "app_", previous = "old_")
//!     old_count  ──→ app_count      (old entry removed)
//!     KVSYNC_*   ──→ untouched
//!     KVSYNC_prefix := "app_"       (next run migrates from here)
//! ```
//!
//! A previous prefix of `""` copies matching entries without deleting them,
//! since every key matches the empty prefix.

use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use kvsync_core::{BindingConfig, KvSyncResult, SyncConfig, Value, CONFIG_PREFIX};
use tokio::sync::broadcast;

use crate::adapter::{BackendAdapter, ChangeSink, KeyBook};
use crate::change::StoreChange;
use crate::cookie::{CookieJar, CookieStore};
use crate::file::JsonFileStore;
use crate::marshal::{Identity, JsonText, Marshal};
use crate::memory::{MemoryStore, ValueStore};
use crate::raw::RawStore;

/// Capacity of each adapter's change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Config key under which the last used prefix is remembered.
fn remembered_prefix_key() -> String {
    format!("{}prefix", CONFIG_PREFIX)
}

/// Session-lifetime store: JSON text in process memory.
pub type SessionStorage = StorageAdapter<MemoryStore, JsonText>;
/// Durable store: JSON text in a file.
pub type LocalStorage = StorageAdapter<JsonFileStore, JsonText>;
/// Cookie store: JSON text in a cookie jar.
pub type CookiesStorage = StorageAdapter<CookieStore, JsonText>;
/// Shared in-memory store holding values directly.
pub type SharedStorage = StorageAdapter<ValueStore, Identity>;

/// A source of externally made changes, polled by
/// [`crate::spawn_external_poller`].
pub trait ExternalSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Pull and dispatch external changes. Returns how many were found.
    fn poll_external(&self) -> usize;
}

/// [`BackendAdapter`] over a raw store `S` with marshalling `M`.
pub struct StorageAdapter<S, M>
where
    S: RawStore,
    M: Marshal<Item = S::Item>,
{
    name: String,
    prefix: String,
    store: S,
    changes: broadcast::Sender<StoreChange>,
    sink: RwLock<Option<Weak<dyn ChangeSink>>>,
    bound_keys: KeyBook,
    _marshal: PhantomData<fn() -> M>,
}

impl<S, M> StorageAdapter<S, M>
where
    S: RawStore,
    M: Marshal<Item = S::Item>,
{
    /// Wrap `store` without prefix migration.
    pub fn new(name: impl Into<String>, store: S, prefix: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            prefix: prefix.into(),
            store,
            changes,
            sink: RwLock::new(None),
            bound_keys: KeyBook::new(),
            _marshal: PhantomData,
        }
    }

    /// Wrap `store` using `config.prefix`, migrating entries from the
    /// previous prefix and remembering the current one.
    ///
    /// The previous prefix is `config.previous_prefix` if set, otherwise the
    /// prefix remembered in the store by an earlier run.
    pub fn open(name: impl Into<String>, store: S, config: &SyncConfig) -> KvSyncResult<Self> {
        config.validate()?;
        let adapter = Self::new(name, store, config.prefix.clone());

        let remembered_key = remembered_prefix_key();
        let previous = match &config.previous_prefix {
            Some(previous) => Some(previous.clone()),
            None => adapter
                .store
                .get_item(&remembered_key)
                .and_then(M::from_storable)
                .and_then(|v| v.as_str().map(str::to_string)),
        };

        if let Some(previous) = previous {
            adapter.migrate_prefix(&previous)?;
        }

        let remembered = M::to_storable(&remembered_key, &Value::String(config.prefix.clone()))?;
        adapter.store.set_item(&remembered_key, remembered, None)?;
        Ok(adapter)
    }

    fn migrate_prefix(&self, previous: &str) -> KvSyncResult<()> {
        if previous == self.prefix {
            return Ok(());
        }

        let mut moved = 0usize;
        for (storage_key, item) in self.store.entries() {
            if !storage_key.starts_with(previous) || storage_key.starts_with(CONFIG_PREFIX) {
                continue;
            }
            // Already under the new prefix when the new prefix extends the old one.
            if self.prefix.starts_with(previous) && storage_key.starts_with(&self.prefix) {
                continue;
            }
            let logical = &storage_key[previous.len()..];
            let target = format!("{}{}", self.prefix, logical);
            if target == storage_key {
                continue;
            }
            self.store.set_item(&target, item, None)?;
            if !previous.is_empty() {
                self.store.remove_item(&storage_key)?;
            }
            moved += 1;
        }

        tracing::info!(
            backend = %self.name,
            from = %previous,
            to = %self.prefix,
            moved,
            "Migrated entries to new prefix"
        );
        Ok(())
    }

    /// The raw store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Physical key for a logical key.
    pub fn storage_key(&self, key: &str, config: &BindingConfig) -> String {
        let prefix = config.prefix.as_deref().unwrap_or(&self.prefix);
        format!("{}{}", prefix, key)
    }

    /// Logical key for a physical key, if it carries this adapter's prefix.
    pub fn logical_key<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(self.prefix.as_str())
    }

    /// Store `value` under `key`, returning the store's error if it rejects
    /// the write. `Value::Null` removes the key.
    pub fn try_set(&self, key: &str, value: Value, config: &BindingConfig) -> KvSyncResult<()> {
        if value.is_null() {
            return self.try_remove(key, config);
        }

        let storage_key = self.storage_key(key, config);
        let item = M::to_storable(key, &value)?;
        let old_value = self.store.get_item(&storage_key).and_then(M::from_storable);
        self.store
            .set_item(&storage_key, item, config.expires.as_ref())?;

        self.emit(StoreChange::internal(
            &self.name,
            key,
            &storage_key,
            old_value,
            Some(value.clone()),
        ));
        if let Some(sink) = self.sink() {
            sink.backend_wrote(&self.name, key, &value);
        }
        Ok(())
    }

    /// Remove `key`, returning the store's error if it rejects the removal.
    pub fn try_remove(&self, key: &str, config: &BindingConfig) -> KvSyncResult<()> {
        let storage_key = self.storage_key(key, config);
        let old_value = self.store.get_item(&storage_key).and_then(M::from_storable);
        self.store.remove_item(&storage_key)?;

        if old_value.is_some() {
            self.emit(StoreChange::internal(
                &self.name,
                key,
                &storage_key,
                old_value,
                None,
            ));
        }
        if let Some(sink) = self.sink() {
            sink.backend_removed(&self.name, key);
        }
        Ok(())
    }

    fn emit(&self, change: StoreChange) {
        // No subscribers is not an error.
        let _ = self.changes.send(change);
    }

    fn sink(&self) -> Option<Arc<dyn ChangeSink>> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl StorageAdapter<MemoryStore, JsonText> {
    /// Session store named `"sessionStorage"`.
    pub fn session(config: &SyncConfig) -> KvSyncResult<Self> {
        Self::open("sessionStorage", MemoryStore::new(), config)
    }
}

impl StorageAdapter<JsonFileStore, JsonText> {
    /// Durable store named `"localStorage"` persisted at `path`.
    pub fn local(path: impl AsRef<std::path::Path>, config: &SyncConfig) -> KvSyncResult<Self> {
        Self::open("localStorage", JsonFileStore::open(path)?, config)
    }
}

impl StorageAdapter<CookieStore, JsonText> {
    /// Cookie store named `"cookiesStorage"` over `jar`.
    pub fn cookies(jar: Arc<CookieJar>, config: &SyncConfig) -> KvSyncResult<Self> {
        let store = CookieStore::new(jar, config.cookies_scope.clone());
        Self::open("cookiesStorage", store, config)
    }
}

impl StorageAdapter<ValueStore, Identity> {
    /// Shared store named `"sharedStorage"`. Never migrates prefixes.
    pub fn shared(config: &SyncConfig) -> Self {
        Self::new("sharedStorage", ValueStore::new(), config.prefix.clone())
    }
}

impl<S, M> BackendAdapter for StorageAdapter<S, M>
where
    S: RawStore,
    M: Marshal<Item = S::Item>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get(&self, key: &str, config: &BindingConfig) -> Option<Value> {
        self.store
            .get_item(&self.storage_key(key, config))
            .and_then(M::from_storable)
    }

    fn set(&self, key: &str, value: Value, config: &BindingConfig) {
        if let Err(e) = self.try_set(key, value, config) {
            tracing::warn!(
                backend = %self.name,
                store = self.store.kind(),
                key = %key,
                error = %e,
                "Backend rejected write"
            );
        }
    }

    fn remove(&self, key: &str, config: &BindingConfig) {
        if let Err(e) = self.try_remove(key, config) {
            tracing::warn!(
                backend = %self.name,
                key = %key,
                error = %e,
                "Backend rejected removal"
            );
        }
    }

    fn clear(&self) {
        self.emit(StoreChange::cleared(&self.name));

        for (storage_key, _) in self.store.entries() {
            if storage_key.starts_with(CONFIG_PREFIX) {
                continue;
            }
            if let Err(e) = self.store.remove_item(&storage_key) {
                tracing::warn!(
                    backend = %self.name,
                    key = %storage_key,
                    error = %e,
                    "Backend rejected removal"
                );
                continue;
            }
            if let (Some(sink), Some(key)) = (self.sink(), self.logical_key(&storage_key)) {
                sink.backend_removed(&self.name, key);
            }
        }
    }

    fn for_each(&self, visit: &mut dyn FnMut(&Value, &str)) {
        for (storage_key, item) in self.store.entries() {
            let value = M::from_storable(item).unwrap_or(Value::Null);
            visit(&value, &storage_key);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn connect(&self, sink: Weak<dyn ChangeSink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn track_key(&self, key: &str) {
        self.bound_keys.track(key);
    }

    fn untrack_key(&self, key: &str) {
        self.bound_keys.untrack(key);
    }

    fn tracked_keys(&self) -> Vec<String> {
        self.bound_keys.list()
    }
}

impl<S, M> ExternalSource for StorageAdapter<S, M>
where
    S: RawStore,
    M: Marshal<Item = S::Item>,
{
    fn source_name(&self) -> &str {
        &self.name
    }

    fn poll_external(&self) -> usize {
        let changes = self.store.poll_external();
        let found = changes.len();

        for change in changes {
            let old_value = change.old.and_then(M::from_storable);
            let new_value = change.new.and_then(M::from_storable);
            let key = self
                .logical_key(&change.storage_key)
                .map(str::to_string);

            self.emit(StoreChange {
                storage: self.name.clone(),
                key: key.clone(),
                storage_key: Some(change.storage_key.clone()),
                old_value,
                new_value: new_value.clone(),
                is_internal: false,
                timestamp: chrono::Utc::now(),
            });

            let (Some(key), Some(sink)) = (key, self.sink()) else {
                continue;
            };
            tracing::debug!(backend = %self.name, key = %key, "External change detected");
            match new_value {
                Some(value) => sink.backend_wrote(&self.name, &key, &value),
                None => sink.backend_removed(&self.name, &key),
            }
        }

        found
    }
}

impl<S, M> std::fmt::Debug for StorageAdapter<S, M>
where
    S: RawStore,
    M: Marshal<Item = S::Item>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("store", &self.store.kind())
            .field("bound_keys", &self.bound_keys.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(String, String, Value)>>,
        removals: Mutex<Vec<(String, String)>>,
    }

    impl ChangeSink for RecordingSink {
        fn backend_wrote(&self, origin: &str, key: &str, value: &Value) {
            self.writes
                .lock()
                .unwrap()
                .push((origin.to_string(), key.to_string(), value.clone()));
        }

        fn backend_removed(&self, origin: &str, key: &str) {
            self.removals
                .lock()
                .unwrap()
                .push((origin.to_string(), key.to_string()));
        }
    }

    fn session(prefix: &str) -> SessionStorage {
        SessionStorage::new("sessionStorage", MemoryStore::new(), prefix)
    }

    #[test]
    fn test_set_get_uses_prefix_and_json() {
        let adapter = session("app_");
        let config = BindingConfig::default();
        adapter.set("user", json!({"name": "x"}), &config);

        assert_eq!(adapter.get("user", &config), Some(json!({"name": "x"})));
        assert_eq!(
            adapter.store().get_item("app_user"),
            Some("{\"name\":\"x\"}".to_string())
        );
        assert_eq!(adapter.keys(), vec!["app_user".to_string()]);
    }

    #[test]
    fn test_prefix_override_per_binding() {
        let adapter = session("app_");
        let config = BindingConfig::with_prefix_only("other_");
        adapter.set("k", json!(1), &config);
        assert_eq!(adapter.store().get_item("other_k"), Some("1".to_string()));
        assert_eq!(adapter.get("k", &BindingConfig::default()), None);
    }

    #[test]
    fn test_null_means_remove() {
        let adapter = session("app_");
        let config = BindingConfig::default();
        adapter.set("k", json!(1), &config);
        adapter.set("k", Value::Null, &config);
        assert_eq!(adapter.get("k", &config), None);
    }

    #[test]
    fn test_rejected_write_is_a_no_op() {
        let adapter = SessionStorage::new("sessionStorage", MemoryStore::with_quota(16), "");
        let config = BindingConfig::default();
        adapter.set("k", json!("small"), &config);
        adapter.set("k", json!("much too large for the quota"), &config);

        assert_eq!(adapter.get("k", &config), Some(json!("small")));
        assert!(adapter
            .try_set("k", json!("much too large for the quota"), &config)
            .is_err());
    }

    #[test]
    fn test_sink_sees_writes_and_removals() {
        let adapter = session("app_");
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn ChangeSink> = Arc::downgrade(&sink) as Weak<dyn ChangeSink>;
        adapter.connect(weak);

        let config = BindingConfig::default();
        adapter.set("k", json!(1), &config);
        adapter.remove("k", &config);

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], ("sessionStorage".to_string(), "k".to_string(), json!(1)));
        assert_eq!(sink.removals.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_keeps_config_entries() {
        let config = SyncConfig::new().with_prefix("app_");
        let adapter = SessionStorage::session(&config).unwrap();
        adapter.set("a", json!(1), &BindingConfig::default());
        adapter.clear();

        let keys = adapter.keys();
        assert_eq!(keys, vec![remembered_prefix_key()]);
    }

    #[test]
    fn test_open_migrates_previous_prefix() {
        let store = MemoryStore::new();
        store.set_item("old_count", "5".to_string(), None).unwrap();
        store.set_item("unrelated", "1".to_string(), None).unwrap();

        let config = SyncConfig::new()
            .with_prefix("app_")
            .with_previous_prefix("old_");
        let adapter = SessionStorage::open("sessionStorage", store, &config).unwrap();

        assert_eq!(adapter.get("count", &BindingConfig::default()), Some(json!(5)));
        assert_eq!(adapter.store().get_item("old_count"), None);
        assert_eq!(adapter.store().get_item("unrelated"), Some("1".to_string()));
        assert_eq!(
            adapter.store().get_item(&remembered_prefix_key()),
            Some("\"app_\"".to_string())
        );
    }

    #[test]
    fn test_open_migrates_from_remembered_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");

        let first = SyncConfig::new().with_prefix("v1_");
        let adapter = LocalStorage::local(&path, &first).unwrap();
        adapter.set("theme", json!("dark"), &BindingConfig::default());
        drop(adapter);

        let second = SyncConfig::new().with_prefix("v2_");
        let adapter = LocalStorage::local(&path, &second).unwrap();
        assert_eq!(adapter.get("theme", &BindingConfig::default()), Some(json!("dark")));
        assert_eq!(adapter.store().get_item("v1_theme"), None);
    }

    #[test]
    fn test_empty_previous_prefix_copies_without_deleting() {
        let store = MemoryStore::new();
        store.set_item("legacy", "true".to_string(), None).unwrap();

        let config = SyncConfig::new().with_prefix("app_").with_previous_prefix("");
        let adapter = SessionStorage::open("sessionStorage", store, &config).unwrap();

        assert_eq!(adapter.get("legacy", &BindingConfig::default()), Some(json!(true)));
        assert_eq!(adapter.store().get_item("legacy"), Some("true".to_string()));
    }

    #[test]
    fn test_poll_external_dispatches_changes() {
        let adapter = session("app_");
        let sink = Arc::new(RecordingSink::default());
        adapter.connect(Arc::downgrade(&sink) as Weak<dyn ChangeSink>);
        let mut rx = adapter.subscribe();

        adapter
            .store()
            .external_write("app_count", Some("7".to_string()));
        adapter.store().external_write("foreign", Some("1".to_string()));
        assert_eq!(adapter.poll_external(), 2);

        let first = rx.try_recv().unwrap();
        assert!(!first.is_internal);
        assert_eq!(first.key.as_deref(), Some("count"));
        assert_eq!(first.new_value, Some(json!(7)));

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "count");
    }

    #[test]
    fn test_cookie_adapter_applies_expiry() {
        let jar = Arc::new(CookieJar::new("example.com"));
        let config = SyncConfig::new();
        let adapter = CookiesStorage::cookies(Arc::clone(&jar), &config).unwrap();

        let binding = BindingConfig::new().with_expires(kvsync_core::Expiry::Lifetime);
        adapter.set("token", json!("abc"), &binding);
        assert_eq!(adapter.get("token", &binding), Some(json!("abc")));
        assert!(jar.document_cookie().contains("kvsync_token=\"abc\""));
    }

    #[test]
    fn test_shared_adapter_holds_values() {
        let adapter = SharedStorage::shared(&SyncConfig::new());
        adapter.set("list", json!([1, 2]), &BindingConfig::default());
        assert_eq!(
            adapter.store().get_item("kvsync_list"),
            Some(json!([1, 2]))
        );
    }
}
