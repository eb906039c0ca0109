use std::fmt;

use crate::cursor::Cursor;

/// Result alias used throughout the crate, mirroring the `CResult<T>`
/// convention of the storage engine this crate grew out of.
pub type CResult<T> = Result<T, Error>;

/// Everything that can go wrong while driving the transactional engine.
///
/// Propagation policy (spec.md §7): only [`Error::Abort`] is ever
/// swallowed, and only by [`crate::context::transaction`]; only
/// [`Error::CannotCommit`] is ever retried, and only by
/// [`crate::context::transactionally`]. Everything else propagates.
#[derive(Debug)]
pub enum Error {
    /// The current transaction's read or write set collided with the
    /// committed state at the root memory. Carries the cursors that
    /// conflicted.
    CannotCommit(Vec<Cursor>),

    /// Raised by [`crate::context::abort`] to unwind out of a `transaction`
    /// scope. Never escapes past the scope that raised it.
    Abort,

    /// A transactional operation (write/delete/save/commit/...) was
    /// attempted with the current journal being the root memory itself,
    /// i.e. with no open transaction.
    NeedsTransaction,

    /// A part was registered with a whole that disagrees with a whole it
    /// was already registered under.
    Meronymic(String),

    /// The current-journal slot is unbound where a value was required, or
    /// `initialize` was called while a transaction was already active.
    Fluid(String),

    /// A write or delete was attempted against a static (read-only)
    /// cursor.
    StaticCursor,

    /// A cursor has no recorded state at the point it was looked up (the
    /// root memory equivalent of "never allocated or already deleted").
    NotFound,

    /// `allocate` was called for a cursor that already has a state.
    AlreadyAllocated,

    /// Underlying I/O error from the persistent store's log file.
    Io(std::io::Error),

    /// A persistent cursor's state failed to (de)serialize.
    Serialize(String),

    /// Anything else, generally a programmer-facing invariant violation.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CannotCommit(conflicts) => {
                write!(f, "cannot commit: {} conflicting cursor(s)", conflicts.len())
            }
            Error::Abort => write!(f, "transaction aborted"),
            Error::NeedsTransaction => {
                write!(f, "this operation needs to be run in a transaction")
            }
            Error::Meronymic(msg) => write!(f, "meronymic error: {msg}"),
            Error::Fluid(msg) => write!(f, "{msg}"),
            Error::StaticCursor => write!(f, "static cursors are not writable"),
            Error::NotFound => write!(f, "cursor has no recorded state"),
            Error::AlreadyAllocated => write!(f, "cursor is already allocated"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Serialize(msg) => write!(f, "serialization error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Serialize(err.to_string())
    }
}
