//! Per-queue call accounting.
//!
//! Counters are updated by the queue's dispatch thread and read from anywhere
//! (tests, shutdown reports). They track how many state machines were created
//! and destroyed and how many of them currently sit in the acceptor state, so
//! the "one acceptor always waiting" property can be observed under load.

use core::sync::atomic::Ordering;
use portable_atomic::{AtomicU64, AtomicUsize};

#[derive(Debug)]
pub struct QueueStats {
    created: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    acceptors: AtomicUsize,
    min_acceptors: AtomicUsize,
}

impl Default for QueueStats {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStats {
    pub const fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            acceptors: AtomicUsize::new(0),
            min_acceptors: AtomicUsize::new(usize::MAX),
        }
    }

    /// A new state machine entered the acceptor state.
    pub fn acceptor_armed(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        self.acceptors.fetch_add(1, Ordering::AcqRel);
    }

    /// An acceptor was bound to a call and left the acceptor state.
    ///
    /// Records the acceptor count observed right after the transition.
    pub fn acceptor_bound(&self) {
        let remaining = self.acceptors.fetch_sub(1, Ordering::AcqRel) - 1;
        self.min_acceptors.fetch_min(remaining, Ordering::AcqRel);
    }

    /// An acceptor was cancelled by queue shutdown.
    pub fn acceptor_cancelled(&self) {
        self.acceptors.fetch_sub(1, Ordering::AcqRel);
    }

    /// A state machine reached its terminal state and was destroyed.
    pub fn call_destroyed(&self, completed: bool) {
        if completed {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> u64 {
        self.completed() + self.abandoned()
    }

    /// State machines created but not yet destroyed.
    #[cfg(test)]
    pub fn live(&self) -> u64 {
        self.created() - self.destroyed()
    }

    /// State machines currently in the acceptor state.
    #[cfg(test)]
    pub fn acceptors(&self) -> usize {
        self.acceptors.load(Ordering::Acquire)
    }

    /// Lowest acceptor count observed after binding a call, or `None` if no
    /// call has been bound yet.
    pub fn min_acceptors(&self) -> Option<usize> {
        match self.min_acceptors.load(Ordering::Acquire) {
            usize::MAX => None,
            n => Some(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_acceptor_handoff() {
        let stats = QueueStats::new();
        assert_eq!(stats.min_acceptors(), None);

        stats.acceptor_armed();
        stats.acceptor_armed();
        stats.acceptor_bound();
        assert_eq!(stats.acceptors(), 1);
        assert_eq!(stats.min_acceptors(), Some(1));

        stats.call_destroyed(true);
        stats.acceptor_cancelled();
        stats.call_destroyed(false);

        assert_eq!(stats.created(), 2);
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.abandoned(), 1);
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.acceptors(), 0);
    }
}
