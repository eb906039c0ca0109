//! Cell state sentinels and the concrete value type (spec.md §3, §9).
//!
//! `CellState<V>` is the tagged variant the spec's design notes ask for in
//! place of `INSERTED`/`DELETED` singletons compared by pointer identity.
//! `Present` wraps its payload in `Arc<V>` so "deep copy" (allocate a new
//! `Arc` around a cloned `V`) and "same identity" (`Arc::ptr_eq`) stay two
//! distinct, cheap operations, which is exactly what the optimistic
//! conflict check in `Memory::commit_changes` needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

/// The state recorded for a cursor at some point in a log.
///
/// `Clone` here is a shallow clone (shares the `Arc`, preserves identity);
/// use [`CellState::deep_copy`] when the spec calls for a deep copy.
#[derive(Debug, Clone)]
pub enum CellState<V> {
    /// The cursor was allocated in this journal; it has no parent state.
    Inserted,
    /// The cursor is marked for removal on commit.
    Deleted,
    /// The cursor currently holds `v`.
    Present(Arc<V>),
}

impl<V> CellState<V> {
    pub fn present(v: V) -> Self {
        CellState::Present(Arc::new(v))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, CellState::Deleted)
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, CellState::Inserted)
    }

    pub fn as_value(&self) -> Option<&V> {
        match self {
            CellState::Present(v) => Some(v),
            _ => None,
        }
    }

    /// Identity comparison used by conflict detection: two `Present` cells
    /// agree iff they wrap the same allocation; the sentinel variants agree
    /// iff they are the same variant (there is exactly one meaning of
    /// `Inserted` and one of `Deleted` at any log entry).
    pub fn same_identity(&self, other: &CellState<V>) -> bool {
        match (self, other) {
            (CellState::Inserted, CellState::Inserted) => true,
            (CellState::Deleted, CellState::Deleted) => true,
            (CellState::Present(a), CellState::Present(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<V: Clone> CellState<V> {
    /// Allocates a brand-new value with its own identity, copying the
    /// payload. The sentinel variants have no payload to copy.
    pub fn deep_copy(&self) -> CellState<V> {
        match self {
            CellState::Inserted => CellState::Inserted,
            CellState::Deleted => CellState::Deleted,
            CellState::Present(v) => CellState::Present(Arc::new((**v).clone())),
        }
    }
}

/// A deep-copyable, dynamically typed value for use as cursor state when
/// callers do not bring their own `V`.
///
/// Covers the shapes spec.md §4.6's collection cursors wrap: attribute maps,
/// lists, dicts and sets all reduce to `Value::Dict`/`Value::List` plus a
/// scalar leaf. `PartialEq` is structural (needed for the equality the
/// collection wrappers expose, spec.md §4.6); conflict detection itself
/// never compares `Value`s structurally, only by `CellState::same_identity`.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Dict(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Dict(BTreeMap::new())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_identity_is_pointer_equality() {
        let a = CellState::present(Value::Int(1));
        let b = a.clone();
        let c = CellState::present(Value::Int(1));
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn sentinels_agree_by_variant() {
        assert!(CellState::<Value>::Inserted.same_identity(&CellState::Inserted));
        assert!(CellState::<Value>::Deleted.same_identity(&CellState::Deleted));
        assert!(!CellState::<Value>::Inserted.same_identity(&CellState::Deleted));
    }

    #[test]
    fn deep_copy_allocates_new_identity_with_equal_payload() {
        let a = CellState::present(Value::Str("x".into()));
        let b = a.deep_copy();
        assert!(!a.same_identity(&b));
        assert_eq!(a.as_value(), b.as_value());
    }
}
