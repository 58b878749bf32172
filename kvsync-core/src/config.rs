//! Configuration types

use crate::{ConfigError, KvSyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Prefix applied to storage keys when none is configured.
pub const DEFAULT_PREFIX: &str = "kvsync_";

/// Prefix of the entries kvsync keeps for itself inside a store.
/// These entries are never migrated or cleared.
pub const CONFIG_PREFIX: &str = "KVSYNC_";

// ============================================================================
// CLEAR TYPE
// ============================================================================

/// Which entries a service-level clear removes by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearType {
    /// Entries whose storage key starts with the prefix
    Prefix,
    /// Entries tracked by bound properties
    Bound,
    /// Everything except kvsync's own config entries
    All,
}

impl ClearType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearType::Prefix => "prefix",
            ClearType::Bound => "bound",
            ClearType::All => "all",
        }
    }
}

impl fmt::Display for ClearType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClearType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prefix" => Ok(ClearType::Prefix),
            "bound" | "decorators" => Ok(ClearType::Bound),
            "all" => Ok(ClearType::All),
            _ => Err(ConfigError::InvalidValue {
                field: "clear_type".to_string(),
                value: s.to_string(),
                reason: "expected prefix, bound or all".to_string(),
            }),
        }
    }
}

// ============================================================================
// GLOBAL CONFIGURATION
// ============================================================================

/// Process-wide kvsync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Prefix prepended to every storage key.
    pub prefix: String,
    /// Prefix used by an earlier run; matching entries are migrated on open.
    pub previous_prefix: Option<String>,
    /// Default target of a service-level clear.
    pub clear_type: ClearType,
    /// Whether compound values are wrapped for mutation tracking by default.
    pub mutate_objects: bool,
    /// Cookie domain scope, e.g. `"."` for the registrable domain.
    pub cookies_scope: String,
    /// How often the cookie jar is polled for external changes. Zero disables polling.
    pub cookies_check_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            previous_prefix: None,
            clear_type: ClearType::Prefix,
            mutate_objects: true,
            cookies_scope: String::new(),
            cookies_check_interval: Duration::ZERO,
        }
    }
}

impl SyncConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create SyncConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KVSYNC_PREFIX`: Storage key prefix (default: "kvsync_")
    /// - `KVSYNC_PREVIOUS_PREFIX`: Prefix to migrate entries from (default: unset)
    /// - `KVSYNC_CLEAR_TYPE`: "prefix", "bound" or "all" (default: prefix)
    /// - `KVSYNC_MUTATE_OBJECTS`: Wrap compound values for mutation tracking (default: true)
    /// - `KVSYNC_COOKIES_SCOPE`: Cookie domain scope (default: "")
    /// - `KVSYNC_COOKIES_CHECK_INTERVAL_MS`: Cookie polling interval (default: 0, disabled)
    pub fn from_env() -> KvSyncResult<Self> {
        let defaults = Self::default();

        let prefix = std::env::var("KVSYNC_PREFIX").unwrap_or(defaults.prefix);
        let previous_prefix = std::env::var("KVSYNC_PREVIOUS_PREFIX").ok();

        let clear_type = match std::env::var("KVSYNC_CLEAR_TYPE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.clear_type,
        };

        let mutate_objects = std::env::var("KVSYNC_MUTATE_OBJECTS")
            .ok()
            .map(|s| s.to_lowercase() != "false" && s != "0")
            .unwrap_or(defaults.mutate_objects);

        let cookies_scope =
            std::env::var("KVSYNC_COOKIES_SCOPE").unwrap_or(defaults.cookies_scope);

        let cookies_check_interval = match std::env::var("KVSYNC_COOKIES_CHECK_INTERVAL_MS") {
            Ok(raw) => Duration::from_millis(raw.parse().map_err(|_| {
                ConfigError::InvalidValue {
                    field: "cookies_check_interval".to_string(),
                    value: raw.clone(),
                    reason: "must be a whole number of milliseconds".to_string(),
                }
            })?),
            Err(_) => defaults.cookies_check_interval,
        };

        let config = Self {
            prefix,
            previous_prefix,
            clear_type,
            mutate_objects,
            cookies_scope,
            cookies_check_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the storage key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the prefix to migrate from.
    pub fn with_previous_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.previous_prefix = Some(prefix.into());
        self
    }

    /// Enable or disable mutation tracking by default.
    pub fn with_mutate_objects(mut self, enabled: bool) -> Self {
        self.mutate_objects = enabled;
        self
    }

    /// Set the default clear target.
    pub fn with_clear_type(mut self, clear_type: ClearType) -> Self {
        self.clear_type = clear_type;
        self
    }

    /// Set the cookie domain scope.
    pub fn with_cookies_scope(mut self, scope: impl Into<String>) -> Self {
        self.cookies_scope = scope.into();
        self
    }

    /// Set the cookie polling interval.
    pub fn with_cookies_check_interval(mut self, interval: Duration) -> Self {
        self.cookies_check_interval = interval;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - prefix does not start with the reserved config prefix
    /// - previous_prefix does not start with the reserved config prefix
    pub fn validate(&self) -> KvSyncResult<()> {
        if self.prefix.starts_with(CONFIG_PREFIX) {
            return Err(ConfigError::InvalidValue {
                field: "prefix".to_string(),
                value: self.prefix.clone(),
                reason: format!("must not start with reserved prefix {}", CONFIG_PREFIX),
            }
            .into());
        }

        if let Some(previous) = &self.previous_prefix {
            if !previous.is_empty() && previous.starts_with(CONFIG_PREFIX) {
                return Err(ConfigError::InvalidValue {
                    field: "previous_prefix".to_string(),
                    value: previous.clone(),
                    reason: format!("must not start with reserved prefix {}", CONFIG_PREFIX),
                }
                .into());
            }
        }

        Ok(())
    }
}

// ============================================================================
// PER-BINDING CONFIGURATION
// ============================================================================

/// Expiry hint passed to backends that support one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// Expire at the given instant
    At(DateTime<Utc>),
    /// Keep for as long as the backend allows
    Lifetime,
}

/// Options attached to one key on one backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Explicit key; property bindings fall back to the property name.
    pub key: Option<String>,
    /// Prefix override for this binding.
    pub prefix: Option<String>,
    /// Expiry hint. `None` means session lifetime where that distinction exists.
    pub expires: Option<Expiry>,
    /// Mutation tracking override.
    pub mutate: Option<bool>,
}

impl BindingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config carrying only an explicit key.
    pub fn for_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Config carrying only a prefix override.
    pub fn with_prefix_only(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_expires(mut self, expires: Expiry) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_mutate(mut self, mutate: bool) -> Self {
        self.mutate = Some(mutate);
        self
    }

    /// Resolve whether compound values should be wrapped for mutation tracking.
    pub fn mutation_tracking(&self, global_default: bool) -> bool {
        self.mutate.unwrap_or(global_default)
    }
}

// =============================================================================
// TESTS
// =============================================================================
