//! Transactional identity (spec.md §3, §4.2).
//!
//! A cursor carries no state of its own; everything it "contains" lives in
//! logs keyed by its identity. That identity is a `u64` allocated from a
//! process-wide counter (the "cursors as arena indices" redesign spec.md
//! §9 sanctions), wrapped in `Arc`/`Weak` so weak logs get collection for
//! free from `Weak::upgrade` rather than needing a finalizer callback.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

struct Inner {
    id: u64,
    /// A static cursor rejects writes and deletes (spec.md §4.2).
    readonly: bool,
    /// Set once for persistent cursors (spec.md §4.8); independent of
    /// pointer identity, used only for store lookups and serialization.
    pid: Option<String>,
}

/// An opaque transactional identity.
///
/// Two cursors are equal iff they are the same allocation (identity, not
/// structural equality of whatever state they happen to point at).
#[derive(Clone)]
pub struct Cursor(Arc<Inner>);

impl Cursor {
    /// Allocates a fresh, writable cursor.
    pub fn new() -> Self {
        Self(Arc::new(Inner { id: next_id(), readonly: false, pid: None }))
    }

    /// Allocates a fresh static (read-only) cursor.
    pub fn new_static() -> Self {
        Self(Arc::new(Inner { id: next_id(), readonly: true, pid: None }))
    }

    /// Allocates a cursor carrying a persistent id (spec.md §4.8).
    pub(crate) fn new_persistent(pid: String) -> Self {
        Self(Arc::new(Inner { id: next_id(), readonly: false, pid: Some(pid) }))
    }

    /// The stable integer identity used as the log key.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether this cursor rejects writes and deletes.
    pub fn is_static(&self) -> bool {
        self.0.readonly
    }

    /// The persistent id, if this cursor is backed by a persistent store.
    pub fn persistent_id(&self) -> Option<&str> {
        self.0.pid.as_deref()
    }

    /// A weak handle that does not keep the cursor's allocation alive.
    pub fn downgrade(&self) -> WeakCursor {
        WeakCursor { id: self.0.id, inner: Arc::downgrade(&self.0) }
    }

    /// Deep-copy is explicitly the identity operation for cursors
    /// (spec.md §4.2): nested states containing cursors must not clone
    /// them when the containing state is deep-copied.
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Cursor {}

impl Hash for Cursor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0.id)
    }
}

/// A weak reference to a [`Cursor`]'s allocation, used by weak logs
/// (spec.md §4.1) so that logs never keep a cursor alive on their own.
#[derive(Clone)]
pub struct WeakCursor {
    id: u64,
    inner: Weak<Inner>,
}

impl WeakCursor {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upgrade(&self) -> Option<Cursor> {
        self.inner.upgrade().map(Cursor)
    }
}

impl fmt::Debug for WeakCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakCursor({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_cursors_have_distinct_identity() {
        let a = Cursor::new();
        let b = Cursor::new();
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn clone_preserves_identity() {
        let a = Cursor::new();
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn deep_clone_is_identity() {
        let a = Cursor::new();
        let b = a.deep_clone();
        assert_eq!(a, b);
    }

    #[test]
    fn weak_cursor_upgrades_while_alive_and_not_after_drop() {
        let weak = {
            let a = Cursor::new();
            let weak = a.downgrade();
            assert!(weak.upgrade().is_some());
            weak
        };
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn static_cursor_is_marked_readonly() {
        assert!(Cursor::new_static().is_static());
        assert!(!Cursor::new().is_static());
    }
}
