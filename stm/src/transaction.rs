//! The public transaction API (spec.md §4.5), built entirely on top of
//! [`crate::context`]'s explicit `Handle` plumbing plus the thread-local
//! current-journal slot.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::{current, pop, push};
use crate::cursor::Cursor;
use crate::error::{CResult, Error};
use crate::journal::{Handle, Journal};
use crate::state::{CellState, Value};

pub use crate::context::{current_memory, initialize};

/// Allocates `cursor` with `state` in the current journal.
pub fn allocate(cursor: &Cursor, state: Value) -> CResult<()> {
    current()?.allocate(cursor, state)
}

/// Reads `cursor` through any pending local write.
pub fn readable(cursor: &Cursor) -> CResult<Value> {
    match current()?.read_unsaved(cursor)? {
        CellState::Present(v) => Ok((*v).clone()),
        CellState::Inserted | CellState::Deleted => Err(Error::NotFound),
    }
}

/// The journal-local writable cell for `cursor`.
pub fn writable(cursor: &Cursor) -> CResult<Rc<RefCell<Value>>> {
    current()?.write(cursor)
}

pub fn delete(cursor: &Cursor) -> CResult<()> {
    current()?.delete(cursor)
}

/// A control-flow signal: raise with `return Err(transaction::abort())`
/// from inside a `transaction` body. Caught only by the enclosing
/// `transaction` scope (spec.md §7).
pub fn abort() -> Error {
    Error::Abort
}

/// `save_state` over `cursors`, or over `unsaved()` if `None`.
pub fn save(cursors: Option<&[Cursor]>) -> CResult<()> {
    let handle = current()?;
    let journal = handle.as_journal()?;
    match cursors {
        Some(list) => {
            for cursor in list {
                journal.save_state(cursor, false)?;
            }
        }
        None => {
            for cursor in journal.unsaved() {
                journal.save_state(&cursor, false)?;
            }
        }
    }
    Ok(())
}

/// Reverts the given (or all unsaved) write-log entries.
pub fn rollback(cursors: Option<&[Cursor]>) -> CResult<()> {
    let handle = current()?;
    let journal = handle.as_journal()?;
    match cursors {
        Some(list) => {
            for cursor in list {
                journal.revert_state(cursor);
            }
        }
        None => {
            for cursor in journal.unsaved() {
                journal.revert_state(&cursor);
            }
        }
    }
    Ok(())
}

pub fn saved() -> CResult<Vec<Cursor>> {
    Ok(current()?.as_journal()?.saved())
}

pub fn unsaved() -> CResult<Vec<Cursor>> {
    current()?.unsaved()
}

/// Commits the current journal into its `source`, then leaves `source`
/// current.
pub fn commit() -> CResult<()> {
    let handle = pop()?;
    let journal = handle.as_journal()?;
    journal.source().commit_changes(journal)
}

/// Runs `body` inside a fresh child journal of the current one.
///
/// On normal completion, commits if `autocommit` (else just discards the
/// journal — the caller was expected to `commit()` explicitly from inside
/// `body` if it wanted one without autocommit). `Abort` is swallowed and
/// turned into `Ok(None)`; every other error propagates after the journal
/// is discarded.
pub fn transaction<T>(
    name: impl Into<String>,
    autocommit: bool,
    body: impl FnOnce() -> CResult<T>,
) -> CResult<Option<T>> {
    let parent = current()?;
    let journal = Rc::new(Journal::new(name, parent));
    push(Handle::Nested(journal));

    match body() {
        Ok(value) => {
            if autocommit {
                commit()?;
            } else {
                pop()?;
            }
            Ok(Some(value))
        }
        Err(Error::Abort) => {
            pop()?;
            Ok(None)
        }
        Err(other) => {
            pop()?;
            Err(other)
        }
    }
}

/// Runs `body` inside a `transaction`, retrying up to `attempts` times on
/// `CannotCommit`. Re-raises the last `CannotCommit` if every attempt
/// fails.
pub fn transactionally<T>(
    name: impl Into<String> + Clone,
    attempts: usize,
    body: impl Fn() -> CResult<T>,
) -> CResult<T> {
    let mut last_conflict = None;
    for _ in 0..attempts.max(1) {
        match transaction(name.clone(), true, &body) {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => return Err(Error::Abort),
            Err(Error::CannotCommit(conflicts)) => last_conflict = Some(conflicts),
            Err(other) => return Err(other),
        }
    }
    Err(Error::CannotCommit(last_conflict.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_thread() {
        initialize(None).unwrap();
    }

    #[test]
    fn basic_commit_is_visible_in_a_later_transaction() {
        fresh_thread();
        let a = Cursor::new();
        transaction("t1", true, || {
            allocate(&a, Value::Int(0))?;
            Ok(())
        })
        .unwrap();

        let got = transaction("t2", true, || readable(&a)).unwrap();
        assert_eq!(got, Some(Value::Int(0)));
    }

    #[test]
    fn abort_discards_the_journal() {
        fresh_thread();
        let a = Cursor::new();
        let result: CResult<Option<()>> = transaction("t1", true, || -> CResult<()> {
            allocate(&a, Value::Int(1))?;
            Err(abort())
        });
        assert_eq!(result.unwrap(), None);
        let after = transaction("t2", true, || readable(&a));
        assert!(matches!(after, Err(Error::NotFound)));
    }

    #[test]
    fn nested_transaction_commits_into_outer() {
        fresh_thread();
        let a = Cursor::new();
        transaction("outer", true, || {
            allocate(&a, Value::Int(1))?;
            transaction("inner", true, || {
                let cell = writable(&a)?;
                *cell.borrow_mut() = Value::Int(5);
                save(None)
            })?;
            Ok(())
        })
        .unwrap();

        let got = transaction("check", true, || readable(&a)).unwrap();
        assert_eq!(got, Some(Value::Int(5)));
    }

    #[test]
    fn needs_transaction_when_writing_at_the_root() {
        fresh_thread();
        let a = Cursor::new();
        assert!(matches!(writable(&a), Err(Error::NeedsTransaction)));
    }
}
