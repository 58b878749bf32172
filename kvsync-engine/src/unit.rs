//! Per-key synchronization unit.
//!
//! A [`SyncUnit`] coordinates one key between the consumers exposing it and
//! the backends persisting it.
//!
//! # Write path
//!
//! ```text
//! consumer.set(v)
//!     │
//!     ├── first write from this consumer? ── stored value present ──→ keep stored
//!     │                                   └─ absent ─────────────────→ use v
//!     ▼
//! propagate(resolved, origin)
//!     for each binding (insertion order):
//!         backend == origin           → skip (no echo)
//!         backend holds deep-equal    → skip (idempotent)
//!         otherwise                   → backend.set(key, resolved)
//!     ▼
//! invalidate cache, return wrap(resolved)
//! ```
//!
//! # Locking
//!
//! The unit's state sits behind one mutex. It is never held while a backend is
//! called: backend writes re-enter the registry through the change sink, which
//! calls back into this unit.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use kvsync_core::{
    deep_equal_opt, is_absent, is_compound, BindingConfig, Consumer, ConsumerId, HookId, Value,
};

use crate::binding::BackendBinding;
use crate::registry::RegistryInner;
use crate::tracked::{Tracked, Wrapped};

/// An attached consumer and its destruction subscription.
#[derive(Debug)]
struct ConsumerEntry {
    consumer: Consumer,
    hook: Option<HookId>,
}

#[derive(Debug, Default)]
struct UnitState {
    consumers: Vec<ConsumerEntry>,
    bindings: Vec<BackendBinding>,
    initialized: HashSet<ConsumerId>,
    cached: Option<Value>,
    active_consumer: Option<ConsumerId>,
    disposed: bool,
}

/// Synchronization unit for one key.
pub struct SyncUnit {
    key: String,
    name: String,
    registry: Weak<RegistryInner>,
    mutate_objects: bool,
    state: Mutex<UnitState>,
}

impl UnitState {
    fn has_consumer(&self, consumer: ConsumerId) -> bool {
        self.consumers.iter().any(|e| e.consumer.id() == consumer)
    }
}

impl SyncUnit {
    pub(crate) fn new(
        key: String,
        name: String,
        registry: Weak<RegistryInner>,
        mutate_objects: bool,
    ) -> Self {
        Self {
            key,
            name,
            registry,
            mutate_objects,
            state: Mutex::new(UnitState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bindings_snapshot(&self) -> Vec<BackendBinding> {
        self.state().bindings.clone()
    }

    // ========================================================================
    // CONSUMERS
    // ========================================================================

    /// Add `consumer` and subscribe to its destruction. Idempotent.
    pub fn attach_consumer(self: &Arc<Self>, consumer: &Consumer) {
        {
            let mut state = self.state();
            if state.has_consumer(consumer.id()) {
                return;
            }
            state.consumers.push(ConsumerEntry {
                consumer: consumer.clone(),
                hook: None,
            });
        }

        tracing::debug!(
            key = %self.key,
            consumer = %consumer.id(),
            name = consumer.name(),
            "Consumer attached"
        );

        // Runs at once for an already destroyed consumer, detaching it again.
        let unit = Arc::downgrade(self);
        let hook = consumer.on_destroy(move |id| {
            if let Some(unit) = unit.upgrade() {
                unit.detach_consumer(id);
            }
        });

        let recorded = {
            let mut state = self.state();
            let entry = state
                .consumers
                .iter_mut()
                .find(|e| e.consumer.id() == consumer.id());
            match entry {
                Some(entry) => {
                    entry.hook = Some(hook);
                    true
                }
                None => false,
            }
        };
        if !recorded {
            consumer.cancel(hook);
        }
    }

    /// Remove a consumer and cancel its destruction subscription. Removing
    /// the last one disposes the unit.
    pub fn detach_consumer(&self, consumer: ConsumerId) {
        let (entry, now_empty) = {
            let mut state = self.state();
            let Some(index) = state
                .consumers
                .iter()
                .position(|e| e.consumer.id() == consumer)
            else {
                return;
            };
            let entry = state.consumers.remove(index);
            state.initialized.remove(&consumer);
            if state.active_consumer == Some(consumer) {
                state.active_consumer = None;
            }
            (entry, state.consumers.is_empty())
        };

        // A hook already delivered is gone; cancelling it is a no-op.
        if let Some(hook) = entry.hook {
            entry.consumer.cancel(hook);
        }

        tracing::debug!(key = %self.key, consumer = %consumer, "Consumer detached");
        if now_empty {
            self.dispose();
        }
    }

    pub fn has_consumer(&self, consumer: ConsumerId) -> bool {
        self.state().has_consumer(consumer)
    }

    pub fn consumers(&self) -> Vec<ConsumerId> {
        self.state()
            .consumers
            .iter()
            .map(|e| e.consumer.id())
            .collect()
    }

    pub fn is_initialized(&self, consumer: ConsumerId) -> bool {
        self.state().initialized.contains(&consumer)
    }

    /// Forget the key on every backend, release consumer subscriptions, drop
    /// the cache, and leave the registry.
    pub(crate) fn dispose(&self) {
        let (bindings, consumers) = {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.initialized.clear();
            state.cached = None;
            state.active_consumer = None;
            (state.bindings.clone(), std::mem::take(&mut state.consumers))
        };

        for entry in consumers {
            if let Some(hook) = entry.hook {
                entry.consumer.cancel(hook);
            }
        }
        for binding in &bindings {
            binding.backend.untrack_key(&self.key);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self);
        }
        tracing::debug!(key = %self.key, backends = bindings.len(), "Sync unit disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    // ========================================================================
    // BACKENDS
    // ========================================================================

    /// Bind a backend. Idempotent by backend name.
    ///
    /// On first attach the backend is seeded with the unit's current value if
    /// it holds none, and the key is tracked in its bookkeeping. A repeated
    /// attach replaces the binding's config in place.
    pub fn attach_backend(&self, binding: BackendBinding) {
        {
            let mut state = self.state();
            if let Some(existing) = state
                .bindings
                .iter_mut()
                .find(|b| b.backend_name() == binding.backend_name())
            {
                if existing.config != binding.config {
                    tracing::debug!(
                        key = %self.key,
                        backend = binding.backend_name(),
                        "Binding config replaced"
                    );
                    existing.config = binding.config;
                }
                return;
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.connect_backend(&binding.backend);
        }

        let current = self.current_value();
        if let Some(current) = current {
            if binding.backend.get(&self.key, &binding.config).is_none() {
                tracing::debug!(
                    key = %self.key,
                    backend = binding.backend_name(),
                    "Seeding backend"
                );
                binding.backend.set(&self.key, current, &binding.config);
            }
        }
        binding.backend.track_key(&self.key);

        let mut state = self.state();
        if !state
            .bindings
            .iter()
            .any(|b| b.backend_name() == binding.backend_name())
        {
            tracing::debug!(key = %self.key, backend = binding.backend_name(), "Backend attached");
            state.bindings.push(binding);
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.state()
            .bindings
            .iter()
            .map(|b| b.backend_name().to_string())
            .collect()
    }

    /// Config this unit holds for the named backend.
    pub fn binding_config(&self, backend: &str) -> Option<BindingConfig> {
        self.state()
            .bindings
            .iter()
            .find(|b| b.backend_name() == backend)
            .map(|b| b.config.clone())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// The canonical (first) backend's stored value.
    pub fn read(&self) -> Option<Value> {
        let canonical = self.state().bindings.first().cloned()?;
        canonical
            .backend
            .get(&self.key, &canonical.config)
            .filter(|v| !is_absent(v))
    }

    fn current_value(&self) -> Option<Value> {
        let cached = self.state().cached.clone();
        cached.or_else(|| self.read())
    }

    /// The cached value, or the canonical read, wrapped per `config`.
    pub fn read_wrapped(self: &Arc<Self>, config: &BindingConfig) -> Wrapped {
        let cached = self.state().cached.clone();
        let value = match cached {
            Some(value) => Some(value),
            None => {
                let value = self.read();
                if let Some(value) = &value {
                    self.state().cached = Some(value.clone());
                }
                value
            }
        };
        self.wrap(value, config)
    }

    pub fn cached(&self) -> Option<Value> {
        self.state().cached.clone()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write on behalf of `consumer`, which becomes the active consumer.
    pub fn write_from(
        self: &Arc<Self>,
        consumer: ConsumerId,
        value: Value,
        config: &BindingConfig,
    ) -> Wrapped {
        self.state().active_consumer = Some(consumer);
        self.write(value, config, None)
    }

    /// Write `value`, reconciling the active consumer's first write against
    /// the stored value: a stored value wins over a consumer default.
    pub fn write(
        self: &Arc<Self>,
        value: Value,
        config: &BindingConfig,
        origin: Option<&str>,
    ) -> Wrapped {
        let first_contact = {
            let mut state = self.state();
            match state.active_consumer {
                Some(id) if state.has_consumer(id) && !state.initialized.contains(&id) => {
                    state.initialized.insert(id);
                    true
                }
                _ => false,
            }
        };

        let resolved = if first_contact {
            match self.read() {
                Some(stored) => {
                    tracing::debug!(key = %self.key, "Stored value kept over consumer default");
                    stored
                }
                None => value,
            }
        } else {
            value
        };

        self.assign(resolved, config, origin)
    }

    /// Write `value` without first-write reconciliation.
    pub fn assign(
        self: &Arc<Self>,
        value: Value,
        config: &BindingConfig,
        origin: Option<&str>,
    ) -> Wrapped {
        self.store(&value, origin);
        self.wrap(Some(value), config)
    }

    pub(crate) fn store(&self, value: &Value, origin: Option<&str>) {
        self.propagate(value, origin);
        self.invalidate();
    }

    /// Write `value` to every backend except `origin` and those already
    /// holding a deep-equal value. Returns how many backends were written.
    pub fn propagate(&self, value: &Value, origin: Option<&str>) -> usize {
        let bindings = self.bindings_snapshot();
        let mut written = 0;

        for binding in &bindings {
            if origin == Some(binding.backend_name()) {
                continue;
            }
            let current = binding.backend.get(&self.key, &binding.config);
            if deep_equal_opt(current.as_ref(), Some(value)) {
                continue;
            }
            binding
                .backend
                .set(&self.key, value.clone(), &binding.config);
            written += 1;
        }

        if written > 0 {
            tracing::debug!(
                key = %self.key,
                origin = origin.unwrap_or("consumer"),
                written,
                "Propagated value"
            );
        }
        written
    }

    /// Drop the cached value.
    pub fn invalidate(&self) {
        self.state().cached = None;
    }

    /// Wrap `value` for mutation tracking if it is compound and tracking is
    /// enabled for `config`.
    pub fn wrap(self: &Arc<Self>, value: Option<Value>, config: &BindingConfig) -> Wrapped {
        match value {
            Some(value)
                if is_compound(&value) && config.mutation_tracking(self.mutate_objects) =>
            {
                Wrapped::Tracked(Tracked::new(Arc::clone(self), value, config.clone()))
            }
            Some(value) => Wrapped::Plain(value),
            None => Wrapped::Plain(Value::Null),
        }
    }
}

impl std::fmt::Debug for SyncUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SyncUnit")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("consumers", &state.consumers.len())
            .field("bindings", &state.bindings)
            .field("cached", &state.cached.is_some())
            .field("disposed", &state.disposed)
            .finish()
    }
}
