//! kvsync Core - Shared Types
//!
//! Types shared by every kvsync crate:
//! - Error types and the `KvSyncResult` alias
//! - Global (`SyncConfig`) and per-binding (`BindingConfig`) configuration
//! - Consumer identity and the consumer lifecycle collaborator
//! - Structural value helpers: deep equality, dotted paths, deep merge
//!
//! Values are `serde_json::Value` trees throughout; `Value::Null` means absent.

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod value;

pub use config::{BindingConfig, ClearType, Expiry, SyncConfig, CONFIG_PREFIX, DEFAULT_PREFIX};
pub use error::{
    ConfigError, KvSyncError, KvSyncResult, StorageError, SyncError, ValidationError,
};
pub use identity::{ConsumerId, Timestamp};
pub use lifecycle::{Consumer, DestroyHook, HookId};
pub use value::{
    deep_equal, deep_equal_opt, describe, get_path, is_absent, is_compound, merge, parse_path,
    set_path,
};

pub use serde_json::Value;
