use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::dispatcher;
use crate::id::Id;

struct Inner {
    id: Id,
    ready: Cell<bool>,
}

/// A single-shot, identity-hashable readiness gate.
///
/// A `Semaphore` starts not-ready. [`Semaphore::signal`] sets it ready and is
/// idempotent; [`Semaphore::wait`] (via [`crate::suspend::wait`]) parks a
/// continuation until a signal arrives, or resumes it immediately if one
/// already has. A semaphore never un-readies itself — compose a fresh one per
/// round for a repeatable gate.
///
/// Cloning a `Semaphore` clones the handle, not the gate: all clones refer to
/// the same underlying state, much like an `Rc`.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<Inner>,
}

impl Semaphore {
    /// Allocate a fresh semaphore, drawing its identity from the dispatcher's
    /// id allocator.
    pub fn new() -> Semaphore {
        Semaphore {
            inner: Rc::new(Inner {
                id: dispatcher::next_id(),
                ready: Cell::new(false),
            }),
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.inner.id
    }

    /// Mark this semaphore ready. Safe to call more than once.
    pub fn signal(&self) {
        self.inner.ready.set(true);
    }

    /// Current readiness, without side effects.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.get()
    }

    /// Run `body` only if the semaphore is ready right now, returning its
    /// result. This is the critical section `signal`/`signal_all` enter
    /// before touching the dispatcher's `pending` table, so a `wait` racing
    /// ahead of a `signal` can't observe a half-applied transfer.
    pub fn with_ready<R>(&self, body: impl FnOnce() -> R) -> Option<R> {
        if self.is_ready() {
            Some(body())
        } else {
            None
        }
    }
}

impl Default for Semaphore {
    fn default() -> Semaphore {
        Semaphore::new()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.inner.id)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl PartialEq for Semaphore {
    fn eq(&self, other: &Semaphore) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Semaphore {}

impl PartialOrd for Semaphore {
    fn partial_cmp(&self, other: &Semaphore) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Semaphore {
    fn cmp(&self, other: &Semaphore) -> std::cmp::Ordering {
        self.inner.id.cmp(&other.inner.id)
    }
}

impl std::hash::Hash for Semaphore {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ready() {
        let sem = Semaphore::new();
        assert!(!sem.is_ready());
        assert_eq!(sem.with_ready(|| 1), None);
    }

    #[test]
    fn signal_is_idempotent_and_sticky() {
        let sem = Semaphore::new();
        sem.signal();
        sem.signal();
        assert!(sem.is_ready());
        assert_eq!(sem.with_ready(|| "go"), Some("go"));
    }

    #[test]
    fn clones_share_the_same_gate() {
        let sem = Semaphore::new();
        let handle = sem.clone();
        handle.signal();
        assert!(sem.is_ready());
        assert_eq!(sem, handle);
    }

    #[test]
    fn distinct_semaphores_compare_unequal() {
        let a = Semaphore::new();
        let b = Semaphore::new();
        assert_ne!(a, b);
    }
}
