//! An in-memory software transactional memory engine: cursors name
//! transactional state, journals record a transaction's reads and writes,
//! and a root memory commits a journal's changes by optimistic conflict
//! detection rather than locking.
//!
//! The public surface is the `transaction` module's free functions, built
//! on a thread-local current-journal slot (`context`); `journal`, `memory`,
//! `log`, `state`, and `cursor` are the engine underneath it and are public
//! mainly so alternate root memories (like `persistent::PersistentMemory`)
//! can be written outside this crate.

pub mod collections;
pub mod context;
pub mod cursor;
pub mod error;
pub mod journal;
pub mod log;
pub mod memory;
pub mod meronymy;
pub mod persistent;
pub mod state;
pub mod transaction;

pub use cursor::{Cursor, WeakCursor};
pub use error::{CResult, Error};
pub use journal::{Handle, Journal, Root};
pub use log::{Log, StrongLog, WeakLog};
pub use memory::Memory;
pub use persistent::{PersistentMemory, Store};
pub use state::{CellState, Value};

pub use collections::{AttrCursor, DictCursor, ListCursor, SetCursor};
pub use transaction::{
    abort, allocate, commit, current_memory, delete, initialize, readable, rollback, save, saved,
    transaction, transactionally, unsaved, writable,
};
