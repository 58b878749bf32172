//! Nested-path accessor over one stored key.
//!
//! ```ignore
//! let mut profile = storage.load("profile");
//! profile.set_path("user.name").set_default_value(json!("anonymous"))?;
//! profile.save(json!("ada"))?;           // profile = {"user": {"name": "ada"}}
//! profile.append_path("first");
//! profile.truncate_path().update(json!({"age": 36}))?;
//! ```

use std::sync::Arc;

use kvsync_core::{
    describe, get_path, is_compound, merge, parse_path, set_path, BindingConfig, KvSyncResult,
    ValidationError, Value,
};
use kvsync_storage::BackendAdapter;

/// Path-aware view of the value stored under one key.
#[derive(Clone)]
pub struct Resource {
    backend: Arc<dyn BackendAdapter>,
    key: String,
    path: Vec<String>,
    prefix: Option<String>,
    default_value: Option<Value>,
}

impl Resource {
    pub fn new(backend: Arc<dyn BackendAdapter>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            path: Vec::new(),
            prefix: None,
            default_value: None,
        }
    }

    fn config(&self) -> BindingConfig {
        BindingConfig {
            prefix: self.prefix.clone(),
            ..BindingConfig::default()
        }
    }

    fn or_default(&self, value: Option<Value>) -> Option<Value> {
        value
            .filter(|v| !v.is_null())
            .or_else(|| self.default_value.clone())
    }

    fn read_value(&self) -> Option<Value> {
        let full = self.backend.get(&self.key, &self.config())?;
        if self.path.is_empty() {
            Some(full)
        } else {
            get_path(&full, &self.path).cloned()
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value at the current path, or the default value.
    pub fn value(&self) -> Option<Value> {
        self.or_default(self.read_value())
    }

    /// Whole stored value, ignoring the path, or the default value.
    pub fn full_value(&self) -> Option<Value> {
        self.or_default(self.backend.get(&self.key, &self.config()))
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Current path as a dotted string.
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// Effective prefix: the one set on this resource, else the backend's.
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or_else(|| self.backend.prefix())
    }

    pub fn set_path(&mut self, path: &str) -> &mut Self {
        self.path = parse_path(path);
        self
    }

    pub fn append_path(&mut self, segment: &str) -> &mut Self {
        self.path.extend(parse_path(segment));
        self
    }

    /// Drop the last path segment.
    pub fn truncate_path(&mut self) -> &mut Self {
        self.path.pop();
        self
    }

    pub fn reset_path(&mut self) -> &mut Self {
        self.path.clear();
        self
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Move the stored item under `prefix` and use it from now on.
    pub fn change_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        let prefix = prefix.into();
        let value = self.full_value().unwrap_or(Value::Null);
        self.backend
            .set(&self.key, value, &BindingConfig::with_prefix_only(prefix.clone()));
        self.backend.remove(&self.key, &self.config());
        self.set_prefix(prefix)
    }

    /// Use `default_value` for absent reads, and save it if nothing is stored
    /// at the current path.
    pub fn set_default_value(&mut self, default_value: Value) -> KvSyncResult<&mut Self> {
        self.default_value = Some(default_value.clone());
        if self.read_value().filter(|v| !v.is_null()).is_none() {
            self.save(default_value)?;
        }
        Ok(self)
    }

    /// Save `value` at the current path, creating intermediate objects.
    /// An absent value saves the default value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUpdateTarget` if a path is set and the stored value is
    /// a scalar.
    pub fn save(&mut self, value: Value) -> KvSyncResult<&mut Self> {
        let value = self.or_default(Some(value)).unwrap_or(Value::Null);
        let value = if self.path.is_empty() {
            value
        } else {
            let full = self.full_value().unwrap_or(Value::Null);
            if !full.is_null() && !is_compound(&full) {
                return Err(ValidationError::InvalidUpdateTarget {
                    key: self.key.clone(),
                    found: describe(&full).to_string(),
                }
                .into());
            }
            set_path(full, &self.path, value)?
        };

        self.backend.set(&self.key, value, &self.config());
        Ok(self)
    }

    /// Deep-merge `changes` into the value at the current path and save.
    pub fn update(&mut self, changes: Value) -> KvSyncResult<&mut Self> {
        let current = self.read_value().unwrap_or(Value::Null);
        self.save(merge(current, changes))
    }

    /// Remove the stored key.
    pub fn remove(&mut self) -> &mut Self {
        self.backend.remove(&self.key, &self.config());
        self
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("backend", &self.backend.name())
            .field("key", &self.key)
            .field("path", &self.path())
            .field("prefix", &self.prefix())
            .field("default_value", &self.default_value)
            .finish()
    }
}
