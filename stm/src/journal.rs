//! Journals and the root-memory extension point (spec.md §3, §4.4).
//!
//! A journal is a node in a stack of transactions. Its `write_log` holds
//! entries callers are still mutating, so those entries use `Rc<RefCell<V>>`
//! rather than `Arc<V>` — a journal never crosses a thread (see `Handle`
//! below), so there is no need to pay for atomics there. Everything that
//! must be comparable by identity across a commit (`read_log`,
//! `commit_log`) stays on the immutable `CellState<V>` representation from
//! `state.rs`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::cursor::Cursor;
use crate::error::{CResult, Error};
use crate::log::{Log, StrongLog};
use crate::state::CellState;

/// What the extension point spec.md §4.8 calls "Memory" must provide:
/// a mutex-guarded root a journal's chain of `source`s eventually reaches.
/// Implemented by both [`crate::memory::Memory`] and
/// [`crate::persistent::PersistentMemory`] (composition in place of the
/// subclassing spec.md describes, since Rust has no implementation
/// inheritance).
pub trait Root<V>: Send + Sync {
    fn read_saved(&self, cursor: &Cursor) -> CResult<CellState<V>>;
    fn allocate(&self, cursor: &Cursor, state: CellState<V>) -> CResult<()>;
    fn commit_changes(&self, child: &Journal<V>) -> CResult<()>;
    fn name(&self) -> &str;
}

/// The "current journal" spec.md §4.5 threads through the public API,
/// made an explicit, cheaply cloneable value.
///
/// `Nested` holds an `Rc`, so `Handle` is `!Send` whenever it wraps a
/// journal — a journal cannot be handed to another thread, matching
/// spec.md §5's "a journal may not be shared across threads" as a
/// compile-time guarantee rather than a runtime check.
pub enum Handle<V> {
    Root(Arc<dyn Root<V>>),
    Nested(Rc<Journal<V>>),
}

impl<V> Clone for Handle<V> {
    fn clone(&self) -> Self {
        match self {
            Handle::Root(r) => Handle::Root(r.clone()),
            Handle::Nested(j) => Handle::Nested(j.clone()),
        }
    }
}

impl<V: Clone + Default> Handle<V> {
    pub fn read_saved(&self, cursor: &Cursor) -> CResult<CellState<V>> {
        match self {
            Handle::Root(root) => root.read_saved(cursor),
            Handle::Nested(journal) => journal.read_saved(cursor),
        }
    }

    pub fn allocate(&self, cursor: &Cursor, state: V) -> CResult<()> {
        match self {
            Handle::Root(root) => root.allocate(cursor, CellState::present(state)),
            Handle::Nested(journal) => journal.allocate(cursor, state),
        }
    }

    pub fn commit_changes(&self, child: &Journal<V>) -> CResult<()> {
        match self {
            Handle::Root(root) => root.commit_changes(child),
            Handle::Nested(journal) => journal.commit_changes(child),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Handle::Root(root) => root.name().to_owned(),
            Handle::Nested(journal) => journal.name.clone(),
        }
    }

    /// Walks `source` pointers up to the root memory (spec.md §4.5,
    /// `current_memory`).
    pub fn root(&self) -> Arc<dyn Root<V>> {
        match self {
            Handle::Root(root) => root.clone(),
            Handle::Nested(journal) => journal.source.root(),
        }
    }

    /// Reads through any pending local write, falling back to the root's
    /// committed state when this handle IS the root (there is no write
    /// log at the root).
    pub fn read_unsaved(&self, cursor: &Cursor) -> CResult<CellState<V>> {
        match self {
            Handle::Root(root) => root.read_saved(cursor),
            Handle::Nested(journal) => journal.read_unsaved(cursor),
        }
    }

    /// Transactional operations all require a nested journal; calling
    /// them with the root memory as the current handle is a programmer
    /// error (spec.md §7, `NeedsTransaction`).
    pub fn write(&self, cursor: &Cursor) -> CResult<Rc<RefCell<V>>> {
        match self {
            Handle::Root(_) => Err(Error::NeedsTransaction),
            Handle::Nested(journal) => journal.write(cursor),
        }
    }

    pub fn delete(&self, cursor: &Cursor) -> CResult<()> {
        match self {
            Handle::Root(_) => Err(Error::NeedsTransaction),
            Handle::Nested(journal) => journal.delete(cursor),
        }
    }

    pub fn save_state(&self, cursor: &Cursor, force: bool) -> CResult<bool> {
        match self {
            Handle::Root(_) => Err(Error::NeedsTransaction),
            Handle::Nested(journal) => journal.save_state(cursor, force),
        }
    }

    pub fn unsaved(&self) -> CResult<Vec<Cursor>> {
        match self {
            Handle::Root(_) => Err(Error::NeedsTransaction),
            Handle::Nested(journal) => Ok(journal.unsaved()),
        }
    }

    pub fn as_journal(&self) -> CResult<&Journal<V>> {
        match self {
            Handle::Root(_) => Err(Error::NeedsTransaction),
            Handle::Nested(journal) => Ok(journal),
        }
    }
}

/// A pending local write: either a value still being mutated, or a
/// pending delete. Never holds `Inserted` — a freshly allocated cursor is
/// recorded directly in `commit_log` (spec.md §4.4).
pub enum WriteState<V> {
    Writable(Rc<RefCell<V>>),
    Deleted,
}

/// Per-transaction working set: read log, write log, commit log, and the
/// link to a parent `source` (spec.md §3, §4.4).
pub struct Journal<V> {
    name: String,
    source: Handle<V>,
    read_log: RefCell<StrongLog<V>>,
    write_log: RefCell<HashMap<u64, (Cursor, WriteState<V>)>>,
    commit_log: RefCell<StrongLog<V>>,
    active: Cell<bool>,
}

impl<V: Clone + Default> Journal<V> {
    pub fn new(name: impl Into<String>, source: Handle<V>) -> Self {
        Self {
            name: name.into(),
            source,
            read_log: RefCell::new(StrongLog::new()),
            write_log: RefCell::new(HashMap::new()),
            commit_log: RefCell::new(StrongLog::new()),
            active: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Handle<V> {
        &self.source
    }

    /// Lazily notifies `source` that this journal is active. A no-op once
    /// already active; re-entrant after `committed()` (spec.md §4.4 state
    /// machine: `fresh -> active -> committed`, re-entry permitted on
    /// reuse by a retry).
    pub fn begin(&self, _nested: bool) {
        self.active.set(true);
    }

    pub fn committed(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn allocate(&self, cursor: &Cursor, state: V) -> CResult<()> {
        self.begin(true);
        let mut commit_log = self.commit_log.borrow_mut();
        if commit_log.contains(cursor) {
            return Err(Error::AlreadyAllocated);
        }
        commit_log.set(cursor, CellState::present(state));
        Ok(())
    }

    /// Reads through to `source` on a miss, recording the *same* identity
    /// the source returned (not a copy of it) as this journal's read
    /// witness — the witness must be comparable by identity against the
    /// source's later state for conflict detection to mean anything. A
    /// source-side `Deleted` is witnessed as `Inserted`: from this
    /// journal's point of view, a value an ancestor deleted but has not
    /// yet committed looks exactly like a value that never existed.
    pub fn read_saved(&self, cursor: &Cursor) -> CResult<CellState<V>> {
        if let Some(state) = self.commit_log.borrow_mut().get(cursor) {
            return Ok(state);
        }
        if let Some(state) = self.read_log.borrow_mut().get(cursor) {
            return Ok(state);
        }
        self.begin(true);
        let sourced = self.source.read_saved(cursor)?;
        let witnessed = if sourced.is_deleted() { CellState::Inserted } else { sourced };
        self.read_log.borrow_mut().set(cursor, witnessed.clone());
        Ok(witnessed)
    }

    pub fn read_unsaved(&self, cursor: &Cursor) -> CResult<CellState<V>> {
        if let Some((_, ws)) = self.write_log.borrow().get(&cursor.id()) {
            return Ok(match ws {
                WriteState::Deleted => CellState::Deleted,
                WriteState::Writable(rc) => CellState::present(rc.borrow().clone()),
            });
        }
        self.read_saved(cursor)
    }

    /// Returns the journal-local writable cell for `cursor`, deep-copying
    /// the last saved or sourced state into it on first access.
    ///
    /// Rejects static cursors. A cursor this journal itself deleted and
    /// then saved has nothing to fork a write from: `commit_log` holds
    /// `Deleted`, so `write()` errors with `NotFound` rather than
    /// resurrecting a default, matching `log_write`'s call into
    /// `read_saved` with no default argument (DESIGN.md). A cursor that
    /// was never allocated anywhere (or was deleted by an ancestor
    /// journal that has not committed) likewise has nothing to fork a
    /// write from and is a `NotFound` error.
    pub fn write(&self, cursor: &Cursor) -> CResult<Rc<RefCell<V>>> {
        if cursor.is_static() {
            return Err(Error::StaticCursor);
        }
        if let Some((_, WriteState::Writable(rc))) = self.write_log.borrow().get(&cursor.id()) {
            return Ok(rc.clone());
        }
        let base = match self.read_saved(cursor)? {
            CellState::Present(v) => (*v).clone(),
            CellState::Deleted | CellState::Inserted => return Err(Error::NotFound),
        };
        let rc = Rc::new(RefCell::new(base));
        self.write_log
            .borrow_mut()
            .insert(cursor.id(), (cursor.clone(), WriteState::Writable(rc.clone())));
        Ok(rc)
    }

    pub fn delete(&self, cursor: &Cursor) -> CResult<()> {
        if cursor.is_static() {
            return Err(Error::StaticCursor);
        }
        self.write_log.borrow_mut().insert(cursor.id(), (cursor.clone(), WriteState::Deleted));
        Ok(())
    }

    /// Moves `write_log[cursor]` into `commit_log`, deep-copying it.
    /// Returns whether anything moved. With `force`, copies the current
    /// saved state into `commit_log` even with no pending write, except
    /// when that state is `Deleted` — there is nothing to carry forward.
    pub fn save_state(&self, cursor: &Cursor, force: bool) -> CResult<bool> {
        if let Some((_, ws)) = self.write_log.borrow_mut().remove(&cursor.id()) {
            let cell = match ws {
                WriteState::Deleted => CellState::Deleted,
                WriteState::Writable(rc) => CellState::present(rc.borrow().clone()),
            };
            self.commit_log.borrow_mut().set(cursor, cell);
            return Ok(true);
        }
        if force {
            let saved = self.read_saved(cursor)?;
            if saved.is_deleted() {
                return Ok(false);
            }
            self.commit_log.borrow_mut().set(cursor, saved.deep_copy());
            return Ok(true);
        }
        Ok(false)
    }

    pub fn revert_state(&self, cursor: &Cursor) {
        self.write_log.borrow_mut().remove(&cursor.id());
    }

    /// Journal-to-journal commit: no conflict detection (single-threaded
    /// by construction, spec.md §4.4), just deep-copy every changed entry
    /// up into this journal's `commit_log`.
    pub fn commit_changes(&self, child: &Journal<V>) -> CResult<()> {
        for (cursor, _orig, state) in child.changed() {
            self.commit_log.borrow_mut().set(&cursor, state.deep_copy());
        }
        child.committed();
        Ok(())
    }

    /// Cursors with a pending, not-yet-saved write or delete.
    pub fn unsaved(&self) -> Vec<Cursor> {
        self.write_log.borrow().values().map(|(c, _)| c.clone()).collect()
    }

    /// Cursors with an entry ready to propagate to `source`.
    pub fn saved(&self) -> Vec<Cursor> {
        self.commit_log.borrow_mut().iterate().into_iter().map(|(c, _)| c).collect()
    }

    /// `(cursor, state-observed-in-read_log-or-Inserted, state-in-commit_log)`
    /// triples for everything this journal has ready to propagate.
    pub fn changed(&self) -> Vec<(Cursor, CellState<V>, CellState<V>)> {
        let mut read_log = self.read_log.borrow_mut();
        self.commit_log
            .borrow_mut()
            .iterate()
            .into_iter()
            .map(|(cursor, state)| {
                let orig = read_log.get(&cursor).unwrap_or(CellState::Inserted);
                (cursor, orig, state)
            })
            .collect()
    }

    pub fn read(&self) -> Vec<(Cursor, CellState<V>)> {
        self.read_log.borrow_mut().iterate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use crate::state::Value;

    fn root_handle() -> Handle<Value> {
        Handle::Root(Arc::new(Memory::<Value>::new("root", true, true)))
    }

    #[test]
    fn allocate_is_visible_to_self_before_commit() {
        let root = root_handle();
        let j = Journal::new("t1", root);
        let c = Cursor::new();
        j.allocate(&c, Value::Int(1)).unwrap();
        assert_eq!(j.read_saved(&c).unwrap().as_value(), Some(&Value::Int(1)));
    }

    #[test]
    fn write_deep_copies_so_mutation_does_not_alias_source() {
        let root = root_handle();
        let j = Journal::new("t1", root);
        let c = Cursor::new();
        j.allocate(&c, Value::Int(1)).unwrap();
        j.save_state(&c, false).unwrap();
        let cell = j.write(&c).unwrap();
        *cell.borrow_mut() = Value::Int(2);
        // the commit_log copy from allocate() is untouched
        assert_eq!(j.read_unsaved(&c).unwrap().as_value(), Some(&Value::Int(2)));
    }

    #[test]
    fn save_state_moves_write_log_into_commit_log() {
        let root = root_handle();
        let j = Journal::new("t1", root);
        let c = Cursor::new();
        j.allocate(&c, Value::Int(1)).unwrap();
        let cell = j.write(&c).unwrap();
        *cell.borrow_mut() = Value::Int(7);
        assert!(j.save_state(&c, false).unwrap());
        assert!(!j.save_state(&c, false).unwrap());
    }

    #[test]
    fn write_after_delete_and_save_errors() {
        // allocate, save, delete, save again: now commit_log genuinely
        // holds `Deleted` for this cursor, and a further `write` inside
        // the same journal has nothing to fork from.
        let root = root_handle();
        let j = Journal::new("t1", root);
        let c = Cursor::new();
        j.allocate(&c, Value::Int(1)).unwrap();
        j.save_state(&c, false).unwrap();
        j.delete(&c).unwrap();
        j.save_state(&c, false).unwrap();
        assert!(matches!(j.write(&c), Err(Error::NotFound)));
    }

    #[test]
    fn write_immediately_after_delete_resurrects_the_old_value() {
        // delete() alone only touches write_log; read_saved still sees
        // the last saved value until a subsequent save_state moves the
        // delete into commit_log, so write() right after delete() (no
        // intervening save) resurrects the old value, not a default.
        let root = root_handle();
        let j = Journal::new("t1", root);
        let c = Cursor::new();
        j.allocate(&c, Value::Int(1)).unwrap();
        j.save_state(&c, false).unwrap();
        j.delete(&c).unwrap();
        let cell = j.write(&c).unwrap();
        assert_eq!(*cell.borrow(), Value::Int(1));
    }

    #[test]
    fn static_cursor_rejects_write_and_delete() {
        let root = root_handle();
        let j = Journal::new("t1", root);
        let c = Cursor::new_static();
        assert!(matches!(j.write(&c), Err(Error::StaticCursor)));
        assert!(matches!(j.delete(&c), Err(Error::StaticCursor)));
    }
}
