//! Thread-local binding of the current journal (spec.md §4.5, §9).
//!
//! The engine itself (`journal.rs`, `memory.rs`) takes an explicit
//! `Handle<V>` everywhere; this module is the thin, ergonomic layer spec.md
//! §9's design note asks for "only at the API boundary". It is fixed at a
//! concrete `V = Value` because Rust thread-locals do not generalize over
//! a type parameter the way a dynamically typed host language's globals do.

use std::cell::RefCell;
use std::sync::Arc;

use crate::error::{CResult, Error};
use crate::journal::{Handle, Root};
use crate::memory::Memory;
use crate::state::Value;

thread_local! {
    static CURRENT: RefCell<Vec<Handle<Value>>> = RefCell::new(Vec::new());
}

/// Installs a fresh root memory (or `memory`, if given) as this thread's
/// current journal. Fails if the current slot already holds an active,
/// non-root journal (spec.md §4.5).
pub fn initialize(memory: Option<Arc<dyn Root<Value>>>) -> CResult<()> {
    CURRENT.with(|cell| {
        let mut stack = cell.borrow_mut();
        if let Some(Handle::Nested(journal)) = stack.last() {
            if journal.is_active() {
                return Err(Error::Fluid(
                    "cannot initialize: current journal is still active".into(),
                ));
            }
        }
        let root = memory.unwrap_or_else(|| Arc::new(Memory::new("default", true, true)));
        stack.clear();
        stack.push(Handle::Root(root));
        Ok(())
    })
}

/// The current journal, or `FluidError` if `initialize` was never called
/// on this thread (spec.md §5: a spawned thread does not inherit another
/// thread's binding and must call `initialize` itself).
pub fn current() -> CResult<Handle<Value>> {
    CURRENT.with(|cell| {
        cell.borrow()
            .last()
            .cloned()
            .ok_or_else(|| Error::Fluid("no current journal; call initialize() first".into()))
    })
}

pub(crate) fn push(handle: Handle<Value>) {
    CURRENT.with(|cell| cell.borrow_mut().push(handle));
}

/// Pops and returns the innermost journal, leaving its `source` current.
pub(crate) fn pop() -> CResult<Handle<Value>> {
    CURRENT.with(|cell| {
        let mut stack = cell.borrow_mut();
        if stack.len() <= 1 {
            return Err(Error::Fluid("no transaction scope to leave".into()));
        }
        Ok(stack.pop().expect("checked non-empty above"))
    })
}

/// Walks `source` pointers from the current journal to the root memory.
pub fn current_memory() -> CResult<Arc<dyn Root<Value>>> {
    Ok(current()?.root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_installs_a_root_handle() {
        initialize(None).unwrap();
        assert!(matches!(current().unwrap(), Handle::Root(_)));
    }

    #[test]
    fn current_without_initialize_is_fluid_error() {
        CURRENT.with(|cell| cell.borrow_mut().clear());
        assert!(matches!(current(), Err(Error::Fluid(_))));
    }
}
