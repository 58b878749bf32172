//! kvsync Test Utilities
//!
//! Shared test infrastructure for the kvsync workspace:
//! - `RecordingBackend`: a backend wrapper counting writes per key
//! - Proptest generators for keys and JSON values
//! - Fixtures for common backends and configs
//! - Custom assertions for kvsync results

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub use kvsync_core::{
    BindingConfig, ConsumerId, KvSyncError, KvSyncResult, SyncConfig, ValidationError, Value,
};
pub use kvsync_storage::{BackendAdapter, ChangeSink, MemoryStore, SessionStorage, StoreChange};

use tokio::sync::broadcast;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kvsync_engine=debug,kvsync_storage=debug,warn"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// RECORDING BACKEND
// ============================================================================

/// Backend wrapper that records every `set` call it receives.
///
/// Writes the inner backend accepts are still reported to the connected sink,
/// under the inner backend's name.
pub struct RecordingBackend {
    inner: Arc<dyn BackendAdapter>,
    sets: Mutex<HashMap<String, Vec<Value>>>,
}

impl RecordingBackend {
    pub fn new(inner: Arc<dyn BackendAdapter>) -> Self {
        Self {
            inner,
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of `set` calls received for `key`.
    pub fn set_count(&self, key: &str) -> usize {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Values passed to `set` for `key`, in call order.
    pub fn set_values(&self, key: &str) -> Vec<Value> {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_sets(&self) -> usize {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn reset(&self) {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn inner(&self) -> &Arc<dyn BackendAdapter> {
        &self.inner
    }
}

impl BackendAdapter for RecordingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn get(&self, key: &str, config: &BindingConfig) -> Option<Value> {
        self.inner.get(key, config)
    }

    fn set(&self, key: &str, value: Value, config: &BindingConfig) {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push(value.clone());
        self.inner.set(key, value, config);
    }

    fn remove(&self, key: &str, config: &BindingConfig) {
        self.inner.remove(key, config);
    }

    fn clear(&self) {
        self.inner.clear();
    }

    fn for_each(&self, visit: &mut dyn FnMut(&Value, &str)) {
        self.inner.for_each(visit);
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }

    fn connect(&self, sink: Weak<dyn ChangeSink>) {
        self.inner.connect(sink);
    }

    fn track_key(&self, key: &str) {
        self.inner.track_key(key);
    }

    fn untrack_key(&self, key: &str) {
        self.inner.untrack_key(key);
    }

    fn tracked_keys(&self) -> Vec<String> {
        self.inner.tracked_keys()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and stored values.

    use super::*;
    use proptest::prelude::*;

    /// A logical key: short, lowercase, never starting with the config prefix.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// A present scalar value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        ]
    }

    /// Any present JSON value, nested up to a few levels.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|entries| {
                    Value::Object(entries.into_iter().collect())
                }),
            ]
        })
    }

    /// A JSON array of scalars.
    pub fn arb_sequence() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(arb_scalar(), 0..8)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built backends and configs.

    use super::*;

    /// Config with a fixed test prefix.
    pub fn test_config() -> SyncConfig {
        SyncConfig::new().with_prefix("test_")
    }

    /// In-memory session backend with the given name.
    pub fn session_backend(name: &str) -> Arc<dyn BackendAdapter> {
        Arc::new(SessionStorage::new(name, MemoryStore::new(), "test_"))
    }

    /// Session backend wrapped for recording.
    pub fn recording_backend(name: &str) -> Arc<RecordingBackend> {
        Arc::new(RecordingBackend::new(session_backend(name)))
    }

    /// Concrete session backend, for tests that write to its raw store as
    /// another execution context would.
    pub fn external_session(name: &str) -> Arc<SessionStorage> {
        Arc::new(SessionStorage::new(name, MemoryStore::new(), "test_"))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for kvsync results.

    use super::*;

    /// Assert that a KvSyncResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &KvSyncResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a KvSyncResult is an InvalidUpdateTarget validation error.
    #[track_caller]
    pub fn assert_invalid_update_target<T: std::fmt::Debug>(result: &KvSyncResult<T>) {
        match result {
            Err(KvSyncError::Validation(ValidationError::InvalidUpdateTarget { .. })) => {}
            other => panic!("Expected InvalidUpdateTarget, got: {:?}", other),
        }
    }

    /// Assert that a KvSyncResult is a NotASequence validation error.
    #[track_caller]
    pub fn assert_not_a_sequence<T: std::fmt::Debug>(result: &KvSyncResult<T>) {
        match result {
            Err(KvSyncError::Validation(ValidationError::NotASequence { .. })) => {}
            other => panic!("Expected NotASequence, got: {:?}", other),
        }
    }
}
