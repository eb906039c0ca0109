//! Persistent root memory (spec.md §4.8): a `Root<V>` that lazily loads
//! cursor state from a [`super::store::Store`] and writes changes back
//! through the same commit protocol `Memory` uses. Composition stands in
//! for the "subclasses Memory" language of spec.md §4.8, since Rust has no
//! implementation inheritance: the verify/apply logic below is a copy of
//! `Memory::commit_changes` generalized with a writeback step, not a call
//! into `Memory` itself.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};

use crate::cursor::{Cursor, WeakCursor};
use crate::error::{CResult, Error};
use crate::journal::{Journal, Root};
use crate::log::{Log, WeakLog};
use crate::state::CellState;

use super::store::Store;

#[derive(Serialize, Deserialize)]
struct Envelope<V> {
    type_tag: String,
    state: V,
}

/// A `Root<V>` backed by an append-only store. `pcursors` maps a
/// persistent id to the (weak) cursor allocated for it, so repeated
/// `fetch`/`delayed` calls for the same id return the same cursor
/// identity rather than minting a new one each time.
pub struct PersistentMemory<V> {
    name: String,
    mem: Mutex<WeakLog<V>>,
    pcursors: Mutex<HashMap<String, WeakCursor>>,
    store: Mutex<Store>,
    check_read: bool,
    check_write: bool,
    type_tag: String,
}

impl<V> PersistentMemory<V> {
    pub fn open(
        name: impl Into<String>,
        path: impl Into<std::path::PathBuf>,
        check_read: bool,
        check_write: bool,
    ) -> CResult<Self> {
        Ok(Self {
            name: name.into(),
            mem: Mutex::new(WeakLog::new()),
            pcursors: Mutex::new(HashMap::new()),
            store: Mutex::new(Store::open(path)?),
            check_read,
            check_write,
            type_tag: std::any::type_name::<V>().to_owned(),
        })
    }
}

impl<V: Clone + Default + Send + Sync + Serialize + DeserializeOwned> PersistentMemory<V> {
    /// Mints a fresh persistent cursor under a freshly generated id, the
    /// way the source shelf generates one with `uuid.uuid4().hex` when the
    /// caller doesn't supply its own (spec.md §4.8: "a stable opaque id,
    /// e.g. UUID"). The cursor is not yet allocated in `mem`; callers still
    /// go through `transaction::allocate` inside a transaction.
    pub fn new_id(&self) -> Cursor {
        self.delayed(&uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns a cursor for `id` without loading its state — used when
    /// deserializing a value that itself references other persistent
    /// cursors, so cycles don't force an infinite load chain (spec.md
    /// §4.8).
    pub fn delayed(&self, id: &str) -> Cursor {
        let mut pcursors = self.pcursors.lock().expect("pcursors mutex poisoned");
        if let Some(existing) = pcursors.get(id).and_then(WeakCursor::upgrade) {
            return existing;
        }
        let cursor = Cursor::new_persistent(id.to_owned());
        pcursors.insert(id.to_owned(), cursor.downgrade());
        cursor
    }

    /// Returns a cursor for `id`, loading its state from the store if it
    /// is not already resident in `mem`. Holds the store lock for the
    /// whole load to avoid a double load racing with another thread's
    /// `fetch` of the same id (spec.md §4.8).
    pub fn fetch(&self, id: &str) -> CResult<Cursor> {
        let mut store = self.store.lock().expect("store mutex poisoned");
        let cursor = {
            let mut pcursors = self.pcursors.lock().expect("pcursors mutex poisoned");
            if let Some(existing) = pcursors.get(id).and_then(WeakCursor::upgrade) {
                existing
            } else {
                let cursor = Cursor::new_persistent(id.to_owned());
                pcursors.insert(id.to_owned(), cursor.downgrade());
                cursor
            }
        };

        let already_loaded = self.mem.lock().expect("memory mutex poisoned").contains(&cursor);
        if !already_loaded {
            let bytes = store.get(id)?.ok_or(Error::NotFound)?;
            let envelope: Envelope<V> = bincode::deserialize(&bytes)?;
            self.mem.lock().expect("memory mutex poisoned").set(&cursor, CellState::present(envelope.state));
        }
        Ok(cursor)
    }

    fn write_changes(&self, changed: &[(Cursor, CellState<V>, CellState<V>)]) -> CResult<()> {
        let mut store = self.store.lock().expect("store mutex poisoned");
        let mut touched = false;
        for (cursor, _orig, state) in changed {
            let Some(id) = cursor.persistent_id() else { continue };
            touched = true;
            if state.is_deleted() {
                store.delete(id)?;
            } else if let Some(value) = state.as_value() {
                let envelope = Envelope { type_tag: self.type_tag.clone(), state: value.clone() };
                let bytes = bincode::serialize(&envelope)?;
                store.set(id, &bytes)?;
            }
        }
        if touched {
            store.sync()?;
        }
        Ok(())
    }
}

impl<V: Clone + Default + Send + Sync + Serialize + DeserializeOwned> Root<V> for PersistentMemory<V> {
    fn read_saved(&self, cursor: &Cursor) -> CResult<CellState<V>> {
        {
            let mut mem = self.mem.lock().expect("memory mutex poisoned");
            if let Some(state) = mem.get(cursor) {
                return Ok(state);
            }
        }
        let Some(id) = cursor.persistent_id() else { return Err(Error::NotFound) };
        self.fetch(id)?;
        self.mem.lock().expect("memory mutex poisoned").get(cursor).ok_or(Error::NotFound)
    }

    fn allocate(&self, cursor: &Cursor, state: CellState<V>) -> CResult<()> {
        let mut mem = self.mem.lock().expect("memory mutex poisoned");
        mem.allocate(cursor, state)
    }

    fn commit_changes(&self, child: &Journal<V>) -> CResult<()> {
        let mut mem = self.mem.lock().expect("memory mutex poisoned");

        if self.check_read {
            let conflicts: Vec<Cursor> = child
                .read()
                .into_iter()
                .filter(|(cursor, observed)| {
                    let current = mem.get(cursor).unwrap_or(CellState::Deleted);
                    !observed.same_identity(&current)
                })
                .map(|(cursor, _)| cursor)
                .collect();
            if !conflicts.is_empty() {
                return Err(Error::CannotCommit(conflicts));
            }
        }

        let changed = child.changed();

        if self.check_write {
            let conflicts: Vec<Cursor> = changed
                .iter()
                .filter(|(cursor, orig, _)| {
                    let current = mem.get(cursor).unwrap_or(CellState::Inserted);
                    !orig.same_identity(&current)
                })
                .map(|(cursor, _, _)| cursor.clone())
                .collect();
            if !conflicts.is_empty() {
                return Err(Error::CannotCommit(conflicts));
            }
        }

        log::debug!("persistent memory {:?}: applying {} change(s)", self.name, changed.len());
        for (cursor, _orig, state) in &changed {
            if state.is_deleted() {
                mem.delete(cursor);
            } else {
                mem.set(cursor, state.clone());
            }
        }
        drop(mem);

        self.write_changes(&changed)?;
        child.committed();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Handle;
    use crate::state::Value;
    use std::sync::Arc;

    fn open(dir: &tempfile::TempDir) -> Arc<PersistentMemory<Value>> {
        Arc::new(PersistentMemory::open("p", dir.path().join("p.log"), true, true).unwrap())
    }

    #[test]
    fn commit_writes_through_to_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let mem = open(&dir);
        let id = "11111111-1111-1111-1111-111111111111";
        let cursor = mem.delayed(id);

        let handle: Handle<Value> = Handle::Root(mem.clone());
        let j = Journal::new("t1", handle);
        j.allocate(&cursor, Value::Int(42)).unwrap();
        mem.commit_changes(&j).unwrap();

        let reopened = PersistentMemory::<Value>::open("p", dir.path().join("p.log"), true, true).unwrap();
        let fetched = reopened.fetch(id).unwrap();
        assert_eq!(reopened.read_saved(&fetched).unwrap().as_value(), Some(&Value::Int(42)));
    }

    #[test]
    fn delete_removes_the_persisted_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mem = open(&dir);
        let id = "22222222-2222-2222-2222-222222222222";
        let cursor = mem.delayed(id);

        let handle: Handle<Value> = Handle::Root(mem.clone());
        let j = Journal::new("t1", handle.clone());
        j.allocate(&cursor, Value::Int(1)).unwrap();
        mem.commit_changes(&j).unwrap();

        let j2 = Journal::new("t2", handle);
        j2.read_saved(&cursor).unwrap();
        j2.delete(&cursor).unwrap();
        j2.save_state(&cursor, false).unwrap();
        mem.commit_changes(&j2).unwrap();

        let reopened = PersistentMemory::<Value>::open("p", dir.path().join("p.log"), true, true).unwrap();
        assert!(matches!(reopened.fetch(id), Err(Error::NotFound)));
    }

    #[test]
    fn new_id_mints_distinct_persistent_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let mem = open(&dir);
        let a = mem.new_id();
        let b = mem.new_id();
        assert_ne!(a.persistent_id(), b.persistent_id());
        assert_ne!(a, b);
    }
}
