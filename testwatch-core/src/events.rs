// Copyright (c) The testwatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle notifications.

use crate::model::{Session, TestElement};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives notifications about session and test case lifecycle changes.
///
/// Every method has an empty default body, so implementations only override
/// what they care about. Callbacks are invoked synchronously on the thread
/// that caused the change, which may be a registry caller thread, an import
/// worker, or a remote engine connection task. Implementations must not call
/// back into the registry from a callback.
pub trait SessionListener: Send + Sync {
    /// A session was added to the registry. For imports the session is
    /// already complete at this point; live sessions follow up with
    /// [`session_started`](Self::session_started).
    #[allow(unused_variables)]
    fn session_launched(&self, session: &Session) {}

    /// A session transitioned to running.
    #[allow(unused_variables)]
    fn session_started(&self, session: &Session) {}

    /// A session completed normally.
    #[allow(unused_variables)]
    fn session_finished(&self, session: &Session) {}

    /// A session was aborted.
    #[allow(unused_variables)]
    fn session_stopped(&self, session: &Session) {}

    /// A test case appeared in a live session.
    #[allow(unused_variables)]
    fn test_case_started(&self, session: &Session, case: &TestElement) {}

    /// A test case finished.
    #[allow(unused_variables)]
    fn test_case_finished(&self, session: &Session, case: &TestElement) {}

    /// A previously finished test case ran again.
    #[allow(unused_variables)]
    fn test_case_rerun(&self, session: &Session, case: &TestElement) {}
}

/// An ordered set of [`SessionListener`]s.
///
/// Registration is idempotent on the listener's identity, and notification
/// order matches registration order. Notifications iterate over a snapshot,
/// so a callback may add or remove listeners without deadlocking; changes
/// take effect from the next notification.
#[derive(Clone, Default)]
pub struct SessionListeners {
    inner: Arc<Mutex<Vec<Arc<dyn SessionListener>>>>,
}

impl SessionListeners {
    /// Creates an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Re-adding the same `Arc` is a no-op.
    pub fn add(&self, listener: Arc<dyn SessionListener>) {
        let mut listeners = self.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Removes a previously added listener. Unknown listeners are ignored.
    pub fn remove(&self, listener: &Arc<dyn SessionListener>) {
        self.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// The number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Calls `f` once per listener, in registration order.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&dyn SessionListener)) {
        for listener in self.snapshot() {
            f(&*listener);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn SessionListener>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn SessionListener>>> {
        // A poisoned listener list only means a callback panicked; the list
        // itself is still valid.
        self.inner.lock().unwrap_or_else(|error| error.into_inner())
    }
}

impl std::fmt::Debug for SessionListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionListeners")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        finished: AtomicUsize,
    }

    impl SessionListener for CountingListener {
        fn session_finished(&self, _session: &Session) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_is_idempotent() {
        let listeners = SessionListeners::new();
        let counting = Arc::new(CountingListener::default());
        let as_dyn: Arc<dyn SessionListener> = counting.clone();
        listeners.add(as_dyn.clone());
        listeners.add(as_dyn.clone());
        assert_eq!(listeners.len(), 1);

        let session = Session::new("events");
        listeners.for_each(|l| l.session_finished(&session));
        assert_eq!(counting.finished.load(Ordering::SeqCst), 1);

        listeners.remove(&as_dyn);
        assert!(listeners.is_empty());
        listeners.for_each(|l| l.session_finished(&session));
        assert_eq!(counting.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notification_order_matches_registration() {
        struct OrderListener {
            tag: usize,
            seen: Arc<Mutex<Vec<usize>>>,
        }
        impl SessionListener for OrderListener {
            fn session_started(&self, _session: &Session) {
                self.seen.lock().unwrap().push(self.tag);
            }
        }

        let listeners = SessionListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            listeners.add(Arc::new(OrderListener {
                tag,
                seen: seen.clone(),
            }));
        }

        let session = Session::new("events");
        listeners.for_each(|l| l.session_started(&session));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
