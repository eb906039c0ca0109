//! The root memory: shared, mutex-guarded committed state (spec.md §3, §4.3).

use std::sync::Mutex;

use crate::cursor::Cursor;
use crate::error::{CResult, Error};
use crate::journal::{Journal, Root};
use crate::log::{Log, WeakLog};
use crate::state::CellState;

/// Root of the journal chain: a single weak log of committed state plus
/// the policy flags spec.md §4.3 names. `check_read=false`/
/// `check_write=false` disable the respective optimistic check, trading
/// safety for throughput (disabling write-check is "last writer wins").
pub struct Memory<V> {
    name: String,
    mem: Mutex<WeakLog<V>>,
    check_read: bool,
    check_write: bool,
}

impl<V> Memory<V> {
    pub fn new(name: impl Into<String>, check_read: bool, check_write: bool) -> Self {
        Self { name: name.into(), mem: Mutex::new(WeakLog::new()), check_read, check_write }
    }
}

impl<V: Clone + Default + Send + Sync> Root<V> for Memory<V> {
    fn read_saved(&self, cursor: &Cursor) -> CResult<CellState<V>> {
        let mut mem = self.mem.lock().expect("memory mutex poisoned");
        mem.get(cursor).ok_or(Error::NotFound)
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
                log::warn!(
                    "memory {:?}: commit rejected, {} read conflict(s)",
                    self.name,
                    conflicts.len()
                );
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
                log::warn!(
                    "memory {:?}: commit rejected, {} write conflict(s)",
                    self.name,
                    conflicts.len()
                );
                return Err(Error::CannotCommit(conflicts));
            }
        }

        log::debug!("memory {:?}: applying {} change(s)", self.name, changed.len());
        for (cursor, _orig, state) in changed {
            if state.is_deleted() {
                mem.delete(&cursor);
            } else {
                mem.set(&cursor, state);
            }
        }

        drop(mem);
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

    fn root(check_read: bool, check_write: bool) -> Arc<Memory<Value>> {
        Arc::new(Memory::new("test", check_read, check_write))
    }

    #[test]
    fn allocate_then_read_saved() {
        let mem = root(true, true);
        let c = Cursor::new();
        mem.allocate(&c, CellState::present(Value::Int(1))).unwrap();
        assert_eq!(mem.read_saved(&c).unwrap().as_value(), Some(&Value::Int(1)));
    }

    #[test]
    fn read_saved_missing_is_not_found() {
        let mem = root(true, true);
        let c = Cursor::new();
        assert!(matches!(mem.read_saved(&c), Err(Error::NotFound)));
    }

    #[test]
    fn commit_applies_changes_and_removes_deletes() {
        let mem = root(true, true);
        let handle: Handle<Value> = Handle::Root(mem.clone());
        let j = Journal::new("t1", handle);
        let c = Cursor::new();
        j.allocate(&c, Value::Int(1)).unwrap();
        mem.commit_changes(&j).unwrap();
        assert_eq!(mem.read_saved(&c).unwrap().as_value(), Some(&Value::Int(1)));

        let handle2: Handle<Value> = Handle::Root(mem.clone());
        let j2 = Journal::new("t2", handle2);
        j2.read_saved(&c).unwrap();
        j2.delete(&c).unwrap();
        j2.save_state(&c, false).unwrap();
        mem.commit_changes(&j2).unwrap();
        assert!(matches!(mem.read_saved(&c), Err(Error::NotFound)));
    }

    #[test]
    fn write_conflict_detected() {
        let mem = root(true, true);
        let c = Cursor::new();
        mem.allocate(&c, CellState::present(Value::Int(1))).unwrap();

        let ha: Handle<Value> = Handle::Root(mem.clone());
        let a = Journal::new("a", ha);
        a.read_saved(&c).unwrap();
        let cell = a.write(&c).unwrap();
        *cell.borrow_mut() = Value::Int(2);
        a.save_state(&c, false).unwrap();
        mem.commit_changes(&a).unwrap();

        let hb: Handle<Value> = Handle::Root(mem.clone());
        let b = Journal::new("b", hb);
        b.read_saved(&c).unwrap();
        let cell = b.write(&c).unwrap();
        *cell.borrow_mut() = Value::Int(3);
        b.save_state(&c, false).unwrap();
        let result = mem.commit_changes(&b);
        assert!(matches!(result, Err(Error::CannotCommit(_))));
    }
}
