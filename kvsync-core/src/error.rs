//! Error types for kvsync operations

use thiserror::Error;

/// Backend storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Write to {backend} rejected for key {key}: {reason}")]
    WriteRejected {
        backend: String,
        key: String,
        reason: String,
    },

    #[error("Quota exceeded in {backend}: {used} of {limit} bytes")]
    QuotaExceeded {
        backend: String,
        used: usize,
        limit: usize,
    },

    #[error("I/O error in {backend}: {reason}")]
    Io { backend: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Value stored under \"{key}\" is {found}, not an object, and cannot be updated")]
    InvalidUpdateTarget { key: String, found: String },

    #[error("Value stored under \"{key}\" is {found}, not a sequence")]
    NotASequence { key: String, found: String },

    #[error("Invalid path \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Synchronization engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("No backend bound to key {key}")]
    NoBackend { key: String },
}

/// Master error type for all kvsync errors.
#[derive(Debug, Clone, Error)]
pub enum KvSyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type alias for kvsync operations.
pub type KvSyncResult<T> = Result<T, KvSyncError>;

// =============================================================================
// TESTS
// =============================================================================
