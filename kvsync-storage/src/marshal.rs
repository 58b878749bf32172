//! Value marshalling between engine values and raw store items.

use kvsync_core::{KvSyncResult, StorageError, Value};

/// Converts engine values to and from what a raw store holds.
pub trait Marshal: Send + Sync + 'static {
    /// The raw item type held by the store.
    type Item;

    /// Encode a present value for storage.
    fn to_storable(key: &str, value: &Value) -> KvSyncResult<Self::Item>;

    /// Decode a stored item. `None` means the item encodes "absent".
    fn from_storable(item: Self::Item) -> Option<Value>;
}

/// JSON text marshalling for string-only stores.
///
/// The text `undefined` and JSON `null` decode as absent. Text that is not
/// valid JSON is returned as a plain string value, so entries written by other
/// tools stay readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonText;

impl Marshal for JsonText {
    type Item = String;

    fn to_storable(key: &str, value: &Value) -> KvSyncResult<String> {
        serde_json::to_string(value).map_err(|e| {
            StorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn from_storable(item: String) -> Option<Value> {
        if item == "undefined" {
            return None;
        }
        match serde_json::from_str::<Value>(&item) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(_) => Some(Value::String(item)),
        }
    }
}

/// Identity marshalling for stores that hold values directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Marshal for Identity {
    type Item = Value;

    fn to_storable(_key: &str, value: &Value) -> KvSyncResult<Value> {
        Ok(value.clone())
    }

    fn from_storable(item: Value) -> Option<Value> {
        if item.is_null() {
            None
        } else {
            Some(item)
        }
    }
}
