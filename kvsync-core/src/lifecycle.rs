//! Consumer lifecycle with an explicit destruction subscription list.
//!
//! A [`Consumer`] is any object that exposes synchronized values as its own
//! properties. Collaborators that need to release per-consumer state register
//! a callback with [`Consumer::on_destroy`]; [`Consumer::destroy`] delivers
//! exactly one notification to each subscriber.
//!
//! # State Transition Diagram
//!
//! ```text
//! Alive ─── on_destroy() ──→ Alive (hook queued)
//!   │
//!   └── destroy() ──→ Destroyed ─── on_destroy() ──→ hook runs immediately
//! ```

use crate::ConsumerId;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Callback run when a consumer is destroyed.
pub type DestroyHook = Box<dyn FnOnce(ConsumerId) + Send + 'static>;

/// Handle returned by [`Consumer::on_destroy`], used to cancel a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

#[derive(Default)]
struct LifecycleState {
    destroyed: bool,
    next_hook: u64,
    hooks: Vec<(HookId, DestroyHook)>,
}

/// An object exposing synchronized values as properties.
///
/// Cloning yields another handle to the same consumer.
#[derive(Clone)]
pub struct Consumer {
    id: ConsumerId,
    name: Arc<str>,
    state: Arc<Mutex<LifecycleState>>,
}

impl Consumer {
    /// Create a live consumer with a diagnostic name.
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            id: ConsumerId::new(),
            name: Arc::from(name),
            state: Arc::new(Mutex::new(LifecycleState::default())),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .destroyed
    }

    /// Number of pending destruction subscriptions.
    pub fn hook_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hooks
            .len()
    }

    /// Subscribe to the destruction notification.
    ///
    /// If the consumer is already destroyed the hook runs immediately.
    pub fn on_destroy<F>(&self, hook: F) -> HookId
    where
        F: FnOnce(ConsumerId) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let hook_id = HookId(state.next_hook);
        state.next_hook += 1;

        if state.destroyed {
            drop(state);
            hook(self.id);
        } else {
            state.hooks.push((hook_id, Box::new(hook)));
        }
        hook_id
    }

    /// Cancel a subscription. Returns false if it already ran or never existed.
    pub fn cancel(&self, hook_id: HookId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.hooks.len();
        state.hooks.retain(|(id, _)| *id != hook_id);
        state.hooks.len() != before
    }

    /// Destroy the consumer, notifying every subscriber once.
    ///
    /// Later calls are no-ops.
    pub fn destroy(&self) {
        let hooks = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            std::mem::take(&mut state.hooks)
        };

        tracing::debug!(
            consumer = %self.id,
            name = %self.name,
            hooks = hooks.len(),
            "Consumer destroyed"
        );
        // Hooks run without the lock held; they may call back into this consumer.
        for (_, hook) in hooks {
            hook(self.id);
        }
    }
}

impl PartialEq for Consumer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Consumer {}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_destroy_notifies_each_hook_once() {
        let consumer = Consumer::new("Widget");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            consumer.on_destroy(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        consumer.destroy();
        consumer.destroy();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(consumer.is_destroyed());
    }

    #[test]
    fn test_hook_receives_consumer_id() {
        let consumer = Consumer::new("Widget");
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        consumer.on_destroy(move |id| {
            *seen_clone.lock().unwrap() = Some(id);
        });
        consumer.destroy();
        assert_eq!(*seen.lock().unwrap(), Some(consumer.id()));
    }

    #[test]
    fn test_cancelled_hook_does_not_run() {
        let consumer = Consumer::new("Widget");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let hook = consumer.on_destroy(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(consumer.hook_count(), 1);
        assert!(consumer.cancel(hook));
        assert!(!consumer.cancel(hook));
        assert_eq!(consumer.hook_count(), 0);
        consumer.destroy();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_after_destroy_runs_immediately() {
        let consumer = Consumer::new("Widget");
        consumer.destroy();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        consumer.on_destroy(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_lifecycle() {
        let consumer = Consumer::new("Widget");
        let handle = consumer.clone();
        handle.destroy();
        assert!(consumer.is_destroyed());
        assert_eq!(consumer, handle);
    }
}
