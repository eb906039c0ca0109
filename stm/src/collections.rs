//! Cursor collection wrappers (spec.md §4.2, §4.6).
//!
//! Each wrapper adapts a plain [`Cursor`] to the read/write shape of one
//! container kind. Every read method goes through [`transaction::readable`]
//! and every write method through [`transaction::writable`]; callers never
//! see the raw `Value` the cursor's state is made of. None of these
//! implement `Hash` (spec.md §4.6 disables hashing on collection cursors,
//! since their notion of equality — comparing readable states — is not
//! stable across a mutation the way pointer identity is).

use std::collections::BTreeMap;

use crate::cursor::Cursor;
use crate::error::{CResult, Error};
use crate::state::Value;
use crate::transaction::{allocate, readable, writable};

fn dict_of(value: Value) -> CResult<BTreeMap<String, Value>> {
    match value {
        Value::Dict(m) => Ok(m),
        _ => Err(Error::Internal("cursor state is not a dict".into())),
    }
}

fn list_of(value: Value) -> CResult<Vec<Value>> {
    match value {
        Value::List(v) => Ok(v),
        _ => Err(Error::Internal("cursor state is not a list".into())),
    }
}

/// Interprets its state as a mapping from attribute name to value, so
/// property-style access is equivalent to keyed access (spec.md §4.6).
#[derive(Clone)]
pub struct AttrCursor(Cursor);

/// Equality and ordering compare readable states, not cursor identity
/// (spec.md §4.6). An unreadable cursor (outside a transaction, or never
/// allocated) compares by its `None` readable state rather than panicking.
impl PartialEq for AttrCursor {
    fn eq(&self, other: &Self) -> bool {
        readable(&self.0).ok() == readable(&other.0).ok()
    }
}

impl PartialOrd for AttrCursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        readable(&self.0).ok().partial_cmp(&readable(&other.0).ok())
    }
}

impl AttrCursor {
    pub fn new() -> Self {
        Self(Cursor::new())
    }

    pub fn from_cursor(cursor: Cursor) -> Self {
        Self(cursor)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.0
    }

    pub fn allocate_empty(&self) -> CResult<()> {
        allocate(&self.0, Value::Dict(BTreeMap::new()))
    }

    pub fn get(&self, name: &str) -> CResult<Option<Value>> {
        Ok(dict_of(readable(&self.0)?)?.get(name).cloned())
    }

    pub fn set(&self, name: &str, value: Value) -> CResult<()> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let dict = state.as_dict_mut().ok_or_else(|| Error::Internal("cursor state is not a dict".into()))?;
        dict.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> CResult<Option<Value>> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let dict = state.as_dict_mut().ok_or_else(|| Error::Internal("cursor state is not a dict".into()))?;
        Ok(dict.remove(name))
    }

    pub fn deep_clone(&self) -> CResult<AttrCursor> {
        let snapshot = readable(&self.0)?;
        let fresh = AttrCursor::new();
        allocate(fresh.cursor(), snapshot)?;
        Ok(fresh)
    }
}

impl Default for AttrCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a sequence (spec.md §4.2, §4.6).
#[derive(Clone)]
pub struct ListCursor(Cursor);

/// Equality and ordering compare readable states, not cursor identity
/// (spec.md §4.6).
impl PartialEq for ListCursor {
    fn eq(&self, other: &Self) -> bool {
        readable(&self.0).ok() == readable(&other.0).ok()
    }
}

impl PartialOrd for ListCursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        readable(&self.0).ok().partial_cmp(&readable(&other.0).ok())
    }
}

impl ListCursor {
    pub fn new() -> Self {
        Self(Cursor::new())
    }

    pub fn from_cursor(cursor: Cursor) -> Self {
        Self(cursor)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.0
    }

    pub fn allocate_empty(&self) -> CResult<()> {
        allocate(&self.0, Value::List(Vec::new()))
    }

    pub fn len(&self) -> CResult<usize> {
        Ok(list_of(readable(&self.0)?)?.len())
    }

    pub fn is_empty(&self) -> CResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> CResult<Option<Value>> {
        Ok(list_of(readable(&self.0)?)?.get(index).cloned())
    }

    pub fn to_vec(&self) -> CResult<Vec<Value>> {
        list_of(readable(&self.0)?)
    }

    pub fn push(&self, value: Value) -> CResult<()> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let list = state.as_list_mut().ok_or_else(|| Error::Internal("cursor state is not a list".into()))?;
        list.push(value);
        Ok(())
    }

    pub fn pop(&self) -> CResult<Option<Value>> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let list = state.as_list_mut().ok_or_else(|| Error::Internal("cursor state is not a list".into()))?;
        Ok(list.pop())
    }

    pub fn set(&self, index: usize, value: Value) -> CResult<()> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let list = state.as_list_mut().ok_or_else(|| Error::Internal("cursor state is not a list".into()))?;
        if index >= list.len() {
            return Err(Error::Internal("list index out of range".into()));
        }
        list[index] = value;
        Ok(())
    }

    pub fn deep_clone(&self) -> CResult<ListCursor> {
        let snapshot = readable(&self.0)?;
        let fresh = ListCursor::new();
        allocate(fresh.cursor(), snapshot)?;
        Ok(fresh)
    }
}

impl Default for ListCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a keyed mapping (spec.md §4.2, §4.6). Distinct from `AttrCursor`
/// only in the API surface it offers callers.
#[derive(Clone)]
pub struct DictCursor(Cursor);

/// Equality and ordering compare readable states, not cursor identity
/// (spec.md §4.6).
impl PartialEq for DictCursor {
    fn eq(&self, other: &Self) -> bool {
        readable(&self.0).ok() == readable(&other.0).ok()
    }
}

impl PartialOrd for DictCursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        readable(&self.0).ok().partial_cmp(&readable(&other.0).ok())
    }
}

impl DictCursor {
    pub fn new() -> Self {
        Self(Cursor::new())
    }

    pub fn from_cursor(cursor: Cursor) -> Self {
        Self(cursor)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.0
    }

    pub fn allocate_empty(&self) -> CResult<()> {
        allocate(&self.0, Value::Dict(BTreeMap::new()))
    }

    pub fn len(&self) -> CResult<usize> {
        Ok(dict_of(readable(&self.0)?)?.len())
    }

    pub fn contains_key(&self, key: &str) -> CResult<bool> {
        Ok(dict_of(readable(&self.0)?)?.contains_key(key))
    }

    pub fn get(&self, key: &str) -> CResult<Option<Value>> {
        Ok(dict_of(readable(&self.0)?)?.get(key).cloned())
    }

    pub fn keys(&self) -> CResult<Vec<String>> {
        Ok(dict_of(readable(&self.0)?)?.keys().cloned().collect())
    }

    pub fn insert(&self, key: &str, value: Value) -> CResult<Option<Value>> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let dict = state.as_dict_mut().ok_or_else(|| Error::Internal("cursor state is not a dict".into()))?;
        Ok(dict.insert(key.to_owned(), value))
    }

    pub fn remove(&self, key: &str) -> CResult<Option<Value>> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let dict = state.as_dict_mut().ok_or_else(|| Error::Internal("cursor state is not a dict".into()))?;
        Ok(dict.remove(key))
    }

    pub fn deep_clone(&self) -> CResult<DictCursor> {
        let snapshot = readable(&self.0)?;
        let fresh = DictCursor::new();
        allocate(fresh.cursor(), snapshot)?;
        Ok(fresh)
    }
}

impl Default for DictCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a set of unique values, represented as a sorted `Value::List`
/// (there is no dedicated `Value` variant for sets; spec.md §4.6 only
/// requires the wrapper mirror set operations, not a distinct encoding).
#[derive(Clone)]
pub struct SetCursor(Cursor);

/// Equality and ordering compare readable states, not cursor identity
/// (spec.md §4.6).
impl PartialEq for SetCursor {
    fn eq(&self, other: &Self) -> bool {
        readable(&self.0).ok() == readable(&other.0).ok()
    }
}

impl PartialOrd for SetCursor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        readable(&self.0).ok().partial_cmp(&readable(&other.0).ok())
    }
}

impl SetCursor {
    pub fn new() -> Self {
        Self(Cursor::new())
    }

    pub fn from_cursor(cursor: Cursor) -> Self {
        Self(cursor)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.0
    }

    pub fn allocate_empty(&self) -> CResult<()> {
        allocate(&self.0, Value::List(Vec::new()))
    }

    pub fn len(&self) -> CResult<usize> {
        Ok(list_of(readable(&self.0)?)?.len())
    }

    pub fn contains(&self, value: &Value) -> CResult<bool> {
        Ok(list_of(readable(&self.0)?)?.contains(value))
    }

    pub fn insert(&self, value: Value) -> CResult<bool> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let list = state.as_list_mut().ok_or_else(|| Error::Internal("cursor state is not a list".into()))?;
        if list.contains(&value) {
            return Ok(false);
        }
        list.push(value);
        Ok(true)
    }

    pub fn remove(&self, value: &Value) -> CResult<bool> {
        let cell = writable(&self.0)?;
        let mut state = cell.borrow_mut();
        let list = state.as_list_mut().ok_or_else(|| Error::Internal("cursor state is not a list".into()))?;
        let before = list.len();
        list.retain(|v| v != value);
        Ok(list.len() != before)
    }

    pub fn deep_clone(&self) -> CResult<SetCursor> {
        let snapshot = readable(&self.0)?;
        let fresh = SetCursor::new();
        allocate(fresh.cursor(), snapshot)?;
        Ok(fresh)
    }
}

impl Default for SetCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{initialize, transaction};

    #[test]
    fn attr_cursor_roundtrip() {
        initialize(None).unwrap();
        transaction("t", true, || {
            let attrs = AttrCursor::new();
            attrs.allocate_empty()?;
            attrs.set("name", Value::Str("amara".into()))?;
            assert_eq!(attrs.get("name").unwrap(), Some(Value::Str("amara".into())));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn list_cursor_push_and_pop() {
        initialize(None).unwrap();
        transaction("t", true, || {
            let list = ListCursor::new();
            list.allocate_empty()?;
            list.push(Value::Int(1))?;
            list.push(Value::Int(2))?;
            assert_eq!(list.len().unwrap(), 2);
            assert_eq!(list.pop().unwrap(), Some(Value::Int(2)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn set_cursor_insert_is_idempotent() {
        initialize(None).unwrap();
        transaction("t", true, || {
            let set = SetCursor::new();
            set.allocate_empty()?;
            assert!(set.insert(Value::Int(1)).unwrap());
            assert!(!set.insert(Value::Int(1)).unwrap());
            assert_eq!(set.len().unwrap(), 1);
            Ok(())
        })
        .unwrap();
    }
}
