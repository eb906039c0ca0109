//! Cursor-keyed logs, strong and weak (spec.md §3, §4.1).
//!
//! Both variants key by `Cursor::id`, giving O(1) expected lookups without
//! needing the cursor itself to hash or compare by anything but that id.
//! The weak variant cannot rely on a finalizer callback the way the
//! originating implementation's garbage collector offers one, so collected
//! entries are pruned lazily: on `get`/`contains`/`iterate`, any entry whose
//! `Weak` no longer upgrades is dropped in place (spec.md §9, resolved in
//! DESIGN.md).

use std::collections::HashMap;

use crate::cursor::{Cursor, WeakCursor};
use crate::error::{CResult, Error};
use crate::state::CellState;

/// Common operations over a cursor-keyed log (spec.md §4.1).
pub trait Log<V> {
    fn get(&mut self, cursor: &Cursor) -> Option<CellState<V>>;
    fn set(&mut self, cursor: &Cursor, state: CellState<V>);
    fn delete(&mut self, cursor: &Cursor) -> Option<CellState<V>>;
    fn contains(&mut self, cursor: &Cursor) -> bool {
        self.get(cursor).is_some()
    }
    fn allocate(&mut self, cursor: &Cursor, state: CellState<V>) -> CResult<()> {
        if self.contains(cursor) {
            return Err(Error::AlreadyAllocated);
        }
        self.set(cursor, state);
        Ok(())
    }
    fn pop(&mut self, cursor: &Cursor, default: CellState<V>) -> CellState<V> {
        self.delete(cursor).unwrap_or(default)
    }
    fn iterate(&mut self) -> Vec<(Cursor, CellState<V>)>;
    fn clear(&mut self);
    fn len(&mut self) -> usize {
        self.iterate().len()
    }
    fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

/// Entries keep their cursor alive; used inside a single journal for the
/// life of its transaction.
#[derive(Default)]
pub struct StrongLog<V> {
    entries: HashMap<u64, (Cursor, CellState<V>)>,
}

impl<V> StrongLog<V> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<V: Clone> Log<V> for StrongLog<V> {
    fn get(&mut self, cursor: &Cursor) -> Option<CellState<V>> {
        self.entries.get(&cursor.id()).map(|(_, s)| s.clone())
    }

    fn set(&mut self, cursor: &Cursor, state: CellState<V>) {
        self.entries.insert(cursor.id(), (cursor.clone(), state));
    }

    fn delete(&mut self, cursor: &Cursor) -> Option<CellState<V>> {
        self.entries.remove(&cursor.id()).map(|(_, s)| s)
    }

    fn iterate(&mut self) -> Vec<(Cursor, CellState<V>)> {
        self.entries.values().map(|(c, s)| (c.clone(), s.clone())).collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Entries do not keep their cursor alive; used by the root memory and the
/// meronymy index so cursors remain collectible across transaction
/// boundaries (spec.md §3).
#[derive(Default)]
pub struct WeakLog<V> {
    entries: HashMap<u64, (WeakCursor, CellState<V>)>,
}

impl<V> WeakLog<V> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    fn prune(&mut self) {
        self.entries.retain(|_, (w, _)| w.upgrade().is_some());
    }
}

impl<V: Clone> Log<V> for WeakLog<V> {
    fn get(&mut self, cursor: &Cursor) -> Option<CellState<V>> {
        match self.entries.get(&cursor.id()) {
            Some((w, s)) if w.upgrade().is_some() => Some(s.clone()),
            Some(_) => {
                self.entries.remove(&cursor.id());
                None
            }
            None => None,
        }
    }

    fn set(&mut self, cursor: &Cursor, state: CellState<V>) {
        self.entries.insert(cursor.id(), (cursor.downgrade(), state));
    }

    fn delete(&mut self, cursor: &Cursor) -> Option<CellState<V>> {
        self.entries.remove(&cursor.id()).map(|(_, s)| s)
    }

    fn iterate(&mut self) -> Vec<(Cursor, CellState<V>)> {
        self.prune();
        self.entries
            .values()
            .filter_map(|(w, s)| w.upgrade().map(|c| (c, s.clone())))
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&mut self) -> usize {
        self.prune();
        self.entries.len()
    }
}
