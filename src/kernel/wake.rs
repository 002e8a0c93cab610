//! Wake tokens and wake records.
//!
//! A wake token is the revocable handle tying a suspended task to the queue
//! entries that may resume it. A token is scheduled at most once; stale
//! entries (token revoked after unsubscribe or cancellation) are skipped
//! lazily when popped.

use crate::notify::Notify;
use crate::types::TaskId;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Wake, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    /// Armed but not queued anywhere.
    Waiting,
    /// Sitting in the turn queue or the time queue.
    Scheduled,
    /// Popped and consumed; the waiter observed the wake.
    Fired,
    /// Withdrawn; queue entries carrying it are skipped.
    Revoked,
}

/// A one-shot, revocable wake handle.
#[derive(Debug, Clone)]
pub(crate) struct WakeToken(Rc<Cell<TokenState>>);

impl WakeToken {
    pub(crate) fn new() -> Self {
        Self(Rc::new(Cell::new(TokenState::Waiting)))
    }

    /// Transitions to `Scheduled`. Returns false if the token is not armed,
    /// which is how a stale or already-queued waiter is skipped.
    pub(crate) fn mark_scheduled(&self) -> bool {
        if self.0.get() == TokenState::Waiting {
            self.0.set(TokenState::Scheduled);
            true
        } else {
            false
        }
    }

    /// Consumes a scheduled token at pop time. Returns false for entries
    /// that were revoked while queued.
    pub(crate) fn consume(&self) -> bool {
        if self.0.get() == TokenState::Scheduled {
            self.0.set(TokenState::Fired);
            true
        } else {
            false
        }
    }

    /// Returns true once the wake has been observed.
    pub(crate) fn fired(&self) -> bool {
        self.0.get() == TokenState::Fired
    }

    /// Withdraws the token unless the wake already happened.
    pub(crate) fn revoke(&self) {
        if self.0.get() != TokenState::Fired {
            self.0.set(TokenState::Revoked);
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// An entry in the time queue.
#[derive(Debug)]
pub(crate) enum WakeRecord {
    /// Resume a task directly.
    Task { task: TaskId, token: WakeToken },
    /// Fire a notification, waking its subscribers in subscription order.
    Fire { notify: Rc<Notify>, token: WakeToken },
}

/// A waker that does nothing.
///
/// Polling needs a `Context`, but all waking in this kernel goes through
/// explicit scheduling; the standard waker protocol is unused.
pub(crate) fn noop_waker() -> Waker {
    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
        fn wake_by_ref(self: &Arc<Self>) {}
    }

    Waker::from(Arc::new(NoopWaker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_schedules_once() {
        let t = WakeToken::new();
        assert!(t.mark_scheduled());
        assert!(!t.mark_scheduled());
        assert!(t.consume());
        assert!(!t.consume());
        assert!(t.fired());
    }

    #[test]
    fn revoked_token_is_skipped() {
        let t = WakeToken::new();
        assert!(t.mark_scheduled());
        t.revoke();
        assert!(!t.consume());
        assert!(!t.fired());
    }

    #[test]
    fn revoke_after_fire_is_a_no_op() {
        let t = WakeToken::new();
        t.mark_scheduled();
        t.consume();
        t.revoke();
        assert!(t.fired());
    }
}
