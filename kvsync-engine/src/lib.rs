//! kvsync Engine - Key Synchronization
//!
//! Keeps one logical value per key in sync across the consumers exposing it
//! and the backends persisting it.
//!
//! # Components
//!
//! - [`Registry`]: key → [`SyncUnit`] map, created with `init`, disposed with
//!   `teardown`, and the change sink of every backend bound through it
//! - [`SyncUnit`]: consumers, backend bindings, cache and first-write
//!   reconciliation for one key
//! - [`Tracked`]: compound values whose mutations are saved
//! - [`StoredProperty`]: a consumer's binding of one key to one backend
//! - [`StorageService`] and [`Resource`]: direct and nested-path access to a
//!   backend
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::init(SyncConfig::from_env()?);
//! let local: Arc<dyn BackendAdapter> = Arc::new(LocalStorage::local("state.json", registry.config())?);
//! let session: Arc<dyn BackendAdapter> = Arc::new(SessionStorage::session(registry.config())?);
//!
//! let widget = Consumer::new("Widget");
//! let count = StoredProperty::bind(&registry, &widget, Arc::clone(&local), "count", BindingConfig::default());
//! let mirror = StoredProperty::bind(&registry, &widget, session, "count", BindingConfig::default());
//!
//! count.set(json!(0));   // stored value wins if one exists
//! count.set(json!(1));   // both local and session now hold 1
//! widget.destroy();      // last consumer gone: unit disposed
//! ```

pub mod binding;
pub mod property;
pub mod registry;
pub mod resource;
pub mod service;
pub mod tracked;
pub mod unit;

pub use binding::{BackendBinding, UnitSpec};
pub use property::StoredProperty;
pub use registry::Registry;
pub use resource::Resource;
pub use service::{ChangeStream, ClearTarget, StorageService};
pub use tracked::{Tracked, Wrapped};
pub use unit::SyncUnit;

pub use kvsync_core::{
    BindingConfig, ClearType, Consumer, ConsumerId, Expiry, KvSyncError, KvSyncResult, SyncConfig,
    Value,
};
pub use kvsync_storage::{BackendAdapter, StoreChange};
