//! Mutation-tracking value wrapper.
//!
//! A [`Tracked`] stands in for a compound value read from a sync unit. It
//! derefs to the value for reading; every mutation goes through a method that
//! saves the result back through the unit. List operations mirror the native
//! sequence semantics, including their return values and negative indices
//! counted from the end.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use kvsync_core::{
    describe, parse_path, set_path, BindingConfig, KvSyncResult, ValidationError, Value,
};

use crate::unit::SyncUnit;

/// A value returned by a sync unit: plain, or wrapped for mutation tracking.
#[derive(Debug, Clone)]
pub enum Wrapped {
    /// Scalar, absent (`Null`), or compound with tracking disabled.
    Plain(Value),
    /// Compound value whose mutations are saved.
    Tracked(Tracked),
}

impl Wrapped {
    pub fn value(&self) -> &Value {
        match self {
            Wrapped::Plain(value) => value,
            Wrapped::Tracked(tracked) => tracked.value(),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Wrapped::Plain(value) => value,
            Wrapped::Tracked(tracked) => tracked.into_value(),
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Wrapped::Tracked(_))
    }

    pub fn as_tracked_mut(&mut self) -> Option<&mut Tracked> {
        match self {
            Wrapped::Tracked(tracked) => Some(tracked),
            Wrapped::Plain(_) => None,
        }
    }

    /// Unwrap the tracked wrapper, if any.
    pub fn into_tracked(self) -> Option<Tracked> {
        match self {
            Wrapped::Tracked(tracked) => Some(tracked),
            Wrapped::Plain(_) => None,
        }
    }
}

impl Deref for Wrapped {
    type Target = Value;

    fn deref(&self) -> &Value {
        self.value()
    }
}

impl PartialEq<Value> for Wrapped {
    fn eq(&self, other: &Value) -> bool {
        self.value() == other
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn relative_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}

/// String form used by the default sort order.
fn sort_key(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f == 0.0 => "0".to_string(),
            Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
            Some(f) => f.to_string(),
            None => n.to_string(),
        },
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(sort_key).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Compound value wrapped for mutation tracking.
#[derive(Clone)]
pub struct Tracked {
    unit: Arc<SyncUnit>,
    value: Value,
    config: BindingConfig,
}

impl Tracked {
    pub(crate) fn new(unit: Arc<SyncUnit>, value: Value, config: BindingConfig) -> Self {
        Self {
            unit,
            value,
            config,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn key(&self) -> &str {
        self.unit.key()
    }

    /// Save the current value through the unit.
    pub fn save(&self) {
        self.unit.store(&self.value, None);
    }

    /// Assign `new_value` at the dotted `path` and save.
    pub fn set_path(&mut self, path: &str, new_value: Value) -> KvSyncResult<()> {
        let segments = parse_path(path);
        self.value = set_path(self.value.clone(), &segments, new_value)?;
        self.save();
        Ok(())
    }

    /// Mutate the value in place and save.
    pub fn modify<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut Value),
    {
        mutate(&mut self.value);
        self.save();
    }

    // ========================================================================
    // SEQUENCE OPERATIONS
    // ========================================================================

    /// The sequence to operate on: the canonical stored array if there is
    /// one, otherwise this wrapper's own array.
    fn sequence(&self) -> KvSyncResult<Vec<Value>> {
        let current = self
            .unit
            .read()
            .filter(Value::is_array)
            .unwrap_or_else(|| self.value.clone());
        match current {
            Value::Array(items) => Ok(items),
            other => Err(ValidationError::NotASequence {
                key: self.unit.key().to_string(),
                found: describe(&other).to_string(),
            }
            .into()),
        }
    }

    fn commit(&mut self, items: Vec<Value>) -> &Value {
        self.value = Value::Array(items);
        self.save();
        &self.value
    }

    /// Append `item`. Returns the new length.
    pub fn push(&mut self, item: Value) -> KvSyncResult<usize> {
        let mut items = self.sequence()?;
        items.push(item);
        let len = items.len();
        self.commit(items);
        Ok(len)
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> KvSyncResult<Option<Value>> {
        let mut items = self.sequence()?;
        let popped = items.pop();
        self.commit(items);
        Ok(popped)
    }

    /// Remove and return the first element.
    pub fn shift(&mut self) -> KvSyncResult<Option<Value>> {
        let mut items = self.sequence()?;
        let shifted = if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        };
        self.commit(items);
        Ok(shifted)
    }

    /// Prepend `item`. Returns the new length.
    pub fn unshift(&mut self, item: Value) -> KvSyncResult<usize> {
        let mut items = self.sequence()?;
        items.insert(0, item);
        let len = items.len();
        self.commit(items);
        Ok(len)
    }

    /// Remove `delete_count` elements from `start` (all remaining when `None`)
    /// and insert `insert` in their place. Returns the removed elements.
    pub fn splice(
        &mut self,
        start: isize,
        delete_count: Option<usize>,
        insert: Vec<Value>,
    ) -> KvSyncResult<Vec<Value>> {
        let mut items = self.sequence()?;
        let start = relative_index(start, items.len());
        let available = items.len() - start;
        let delete_count = delete_count.map_or(available, |n| n.min(available));
        let removed: Vec<Value> = items
            .splice(start..start + delete_count, insert)
            .collect();
        self.commit(items);
        Ok(removed)
    }

    pub fn reverse(&mut self) -> KvSyncResult<&Value> {
        let mut items = self.sequence()?;
        items.reverse();
        Ok(self.commit(items))
    }

    /// Sort by string form, the default sequence ordering. Stable.
    pub fn sort(&mut self) -> KvSyncResult<&Value> {
        let mut items = self.sequence()?;
        items.sort_by_cached_key(sort_key);
        Ok(self.commit(items))
    }

    pub fn sort_by<F>(&mut self, compare: F) -> KvSyncResult<&Value>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let mut items = self.sequence()?;
        items.sort_by(compare);
        Ok(self.commit(items))
    }

    /// Set every element in `start..end` to `value`. `end` defaults to the length.
    pub fn fill(&mut self, value: Value, start: isize, end: Option<isize>) -> KvSyncResult<&Value> {
        let mut items = self.sequence()?;
        let len = items.len();
        let start = relative_index(start, len);
        let end = end.map_or(len, |end| relative_index(end, len));
        if start < end {
            for slot in &mut items[start..end] {
                *slot = value.clone();
            }
        }
        Ok(self.commit(items))
    }

    /// Copy `start..end` over the elements beginning at `target`.
    pub fn copy_within(
        &mut self,
        target: isize,
        start: isize,
        end: Option<isize>,
    ) -> KvSyncResult<&Value> {
        let mut items = self.sequence()?;
        let len = items.len();
        let to = relative_index(target, len);
        let from = relative_index(start, len);
        let until = end.map_or(len, |end| relative_index(end, len));
        let count = until.saturating_sub(from).min(len - to);
        if count > 0 {
            let chunk = items[from..from + count].to_vec();
            items[to..to + count].clone_from_slice(&chunk);
        }
        Ok(self.commit(items))
    }

    /// Keep only the elements matching `keep`.
    pub fn retain<F>(&mut self, mut keep: F) -> KvSyncResult<&Value>
    where
        F: FnMut(&Value) -> bool,
    {
        let mut items = self.sequence()?;
        items.retain(|item| keep(item));
        Ok(self.commit(items))
    }

    /// Visit every element mutably with its index.
    pub fn for_each_mut<F>(&mut self, mut visit: F) -> KvSyncResult<()>
    where
        F: FnMut(usize, &mut Value),
    {
        let mut items = self.sequence()?;
        for (index, item) in items.iter_mut().enumerate() {
            visit(index, item);
        }
        self.commit(items);
        Ok(())
    }

    /// Replace every element with `map(element)`.
    pub fn map_in_place<F>(&mut self, map: F) -> KvSyncResult<&Value>
    where
        F: FnMut(&Value) -> Value,
    {
        let items = self.sequence()?;
        let mapped = items.iter().map(map).collect();
        Ok(self.commit(mapped))
    }
}

impl Deref for Tracked {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("key", &self.unit.key())
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registry, UnitSpec};
    use kvsync_core::SyncConfig;
    use kvsync_storage::{BackendAdapter, MemoryStore, SessionStorage};
    use serde_json::json;

    fn tracked(initial: Value) -> (Tracked, Arc<dyn BackendAdapter>) {
        let registry = Registry::init(SyncConfig::new());
        let backend: Arc<dyn BackendAdapter> =
            Arc::new(SessionStorage::new("session", MemoryStore::new(), ""));
        backend.set("list", initial, &BindingConfig::default());
        let unit = registry.get_or_create(
            UnitSpec::new("list").with_backend(Arc::clone(&backend), BindingConfig::default()),
        );
        let wrapped = unit.read_wrapped(&BindingConfig::default());
        (wrapped.into_tracked().unwrap(), backend)
    }

    fn stored(backend: &Arc<dyn BackendAdapter>) -> Option<Value> {
        backend.get("list", &BindingConfig::default())
    }

    #[test]
    fn test_push_saves_and_returns_length() {
        let (mut list, backend) = tracked(json!([1, 2]));
        assert_eq!(list.push(json!(3)).unwrap(), 3);
        assert_eq!(stored(&backend), Some(json!([1, 2, 3])));
        assert_eq!(list.value(), &json!([1, 2, 3]));
    }

    #[test]
    fn test_pop_and_shift() {
        let (mut list, backend) = tracked(json!(["a", "b", "c"]));
        assert_eq!(list.pop().unwrap(), Some(json!("c")));
        assert_eq!(list.shift().unwrap(), Some(json!("a")));
        assert_eq!(stored(&backend), Some(json!(["b"])));

        assert_eq!(list.unshift(json!("z")).unwrap(), 2);
        assert_eq!(stored(&backend), Some(json!(["z", "b"])));
    }

    #[test]
    fn test_pop_on_empty_returns_none() {
        let (mut list, _backend) = tracked(json!([]));
        assert_eq!(list.pop().unwrap(), None);
        assert_eq!(list.shift().unwrap(), None);
    }

    #[test]
    fn test_splice_with_negative_start() {
        let (mut list, backend) = tracked(json!([1, 2, 3, 4, 5]));
        let removed = list.splice(-2, Some(1), vec![json!(9), json!(10)]).unwrap();
        assert_eq!(removed, vec![json!(4)]);
        assert_eq!(stored(&backend), Some(json!([1, 2, 3, 9, 10, 5])));

        let removed = list.splice(1, None, vec![]).unwrap();
        assert_eq!(removed.len(), 5);
        assert_eq!(stored(&backend), Some(json!([1])));
    }

    #[test]
    fn test_default_sort_compares_string_forms() {
        let (mut list, backend) = tracked(json!([10, 9, 1, "b", "a"]));
        list.sort().unwrap();
        assert_eq!(stored(&backend), Some(json!([1, 10, 9, "a", "b"])));

        list.sort_by(|a, b| {
            b.as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&a.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal)
        })
        .unwrap();
        assert_eq!(list.value()[0], json!(10));
    }

    #[test]
    fn test_sort_key_of_large_integral_floats() {
        assert_eq!(sort_key(&json!(2e19)), "20000000000000000000");
        assert_eq!(sort_key(&json!(1e20)), "100000000000000000000");
        assert_eq!(sort_key(&json!(-3.0)), "-3");
        assert_eq!(sort_key(&json!(-0.0)), "0");
        assert_eq!(sort_key(&json!(u64::MAX)), "18446744073709551615");
        assert_eq!(sort_key(&json!(1.5)), "1.5");
    }

    #[test]
    fn test_default_sort_orders_floats_beyond_i64() {
        let (mut list, backend) = tracked(json!([2e19, 1e20]));
        list.sort().unwrap();
        assert_eq!(stored(&backend), Some(json!([1e20, 2e19])));
    }

    #[test]
    fn test_fill_and_copy_within() {
        let (mut list, backend) = tracked(json!([1, 2, 3, 4, 5]));
        list.fill(json!(0), 1, Some(-2)).unwrap();
        assert_eq!(stored(&backend), Some(json!([1, 0, 0, 4, 5])));

        list.copy_within(0, 3, None).unwrap();
        assert_eq!(stored(&backend), Some(json!([4, 5, 0, 4, 5])));
    }

    #[test]
    fn test_retain_map_and_reverse() {
        let (mut list, backend) = tracked(json!([1, 2, 3, 4]));
        list.retain(|v| v.as_i64().is_some_and(|n| n % 2 == 0)).unwrap();
        assert_eq!(stored(&backend), Some(json!([2, 4])));

        list.map_in_place(|v| json!(v.as_i64().unwrap_or(0) * 10)).unwrap();
        list.reverse().unwrap();
        assert_eq!(stored(&backend), Some(json!([40, 20])));

        list.for_each_mut(|i, v| *v = json!(i)).unwrap();
        assert_eq!(stored(&backend), Some(json!([0, 1])));
    }

    #[test]
    fn test_operations_read_canonical_value() {
        let (mut list, backend) = tracked(json!([1]));
        backend.set("list", json!([1, 2]), &BindingConfig::default());
        list.push(json!(3)).unwrap();
        assert_eq!(stored(&backend), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_sequence_operation_on_object_fails() {
        let (mut obj, _backend) = tracked(json!({"a": 1}));
        let err = obj.push(json!(1)).unwrap_err();
        assert!(err.to_string().contains("not a sequence"));
    }

    #[test]
    fn test_set_path_and_modify_save() {
        let (mut obj, backend) = tracked(json!({"user": {"name": "a"}}));
        obj.set_path("user.name", json!("b")).unwrap();
        assert_eq!(stored(&backend), Some(json!({"user": {"name": "b"}})));

        obj.modify(|v| v["flag"] = json!(true));
        assert_eq!(stored(&backend), Some(json!({"user": {"name": "b"}, "flag": true})));
    }
}
