//! kvsync Storage - Backend Adapters
//!
//! Everything that touches a physical store:
//! - `BackendAdapter`: the uniform surface the synchronization engine uses
//! - `RawStore` + `Marshal`: slot stores and value encodings
//! - `StorageAdapter`: prefixing, marshalling, change events, prefix migration
//! - Concrete stores: session (memory), local (JSON file), cookies, shared
//! - `spawn_external_poller`: interval polling for stores without native events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   kvsync-engine                         │
//! │            (registry, sync units, services)             │
//! └──────────────┬───────────────────────▲──────────────────┘
//!                │ BackendAdapter        │ ChangeSink
//! ┌──────────────▼───────────────────────┴──────────────────┐
//! │           StorageAdapter<RawStore, Marshal>             │
//! │      prefix · JSON text / identity · StoreChange        │
//! └──────┬──────────────┬──────────────┬──────────────┬─────┘
//!        │              │              │              │
//!   MemoryStore   JsonFileStore   CookieStore    ValueStore
//! ```

pub mod adapter;
pub mod change;
pub mod cookie;
pub mod file;
pub mod marshal;
pub mod memory;
pub mod poller;
pub mod raw;
pub mod storage;

pub use adapter::{BackendAdapter, ChangeSink, KeyBook};
pub use change::{diff_entries, RawChange, StoreChange};
pub use cookie::{parse_cookie_string, resolve_domain, CookieJar, CookieStore, LIFETIME_EXPIRY};
pub use file::JsonFileStore;
pub use marshal::{Identity, JsonText, Marshal};
pub use memory::{MemoryStore, ValueStore};
pub use poller::{spawn_cookie_poller, spawn_external_poller};
pub use raw::RawStore;
pub use storage::{
    CookiesStorage, ExternalSource, LocalStorage, SessionStorage, SharedStorage, StorageAdapter,
};
