//! Single-shot watch signals.
//!
//! Every radix-tree node owns a [`WatchSignal`]. Readers receive the signal
//! of the deepest node covering their query; when a later commit replaces
//! any part of that subtree, the commit closes the signal, waking all
//! waiters. A closed signal stays closed: "something in your observed
//! subtree changed, re-run the query on a fresh snapshot".

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SignalInner {
    closed: Mutex<bool>,
    cond: Condvar,
}

/// A single-shot closeable event.
///
/// Cloning a `WatchSignal` yields another handle to the same event. Any
/// number of threads may wait; [`close`](WatchSignal::close) is idempotent
/// and wakes them all.
#[derive(Clone)]
pub struct WatchSignal {
    inner: Arc<SignalInner>,
}

impl WatchSignal {
    /// Creates a new open signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                closed: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Creates an already-closed signal.
    ///
    /// Used for queries that carry no change notification, so callers can
    /// treat every result uniformly.
    #[must_use]
    pub fn closed() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                closed: Mutex::new(true),
                cond: Condvar::new(),
            }),
        }
    }

    /// Closes the signal, waking all waiters. Closing twice is a no-op.
    pub fn close(&self) {
        let mut closed = self.inner.closed.lock();
        if !*closed {
            *closed = true;
            self.inner.cond.notify_all();
        }
    }

    /// Returns true if the signal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.lock()
    }

    /// Blocks until the signal is closed.
    pub fn wait(&self) {
        let mut closed = self.inner.closed.lock();
        while !*closed {
            self.inner.cond.wait(&mut closed);
        }
    }

    /// Blocks until the signal is closed or the timeout elapses.
    ///
    /// Returns true if the signal was closed, false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut closed = self.inner.closed.lock();
        while !*closed {
            if self.inner.cond.wait_until(&mut closed, deadline).timed_out() {
                return *closed;
            }
        }
        true
    }

    /// Returns true if both handles refer to the same signal.
    #[must_use]
    pub fn same_signal(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for WatchSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WatchSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSignal")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The set of watch signals a write transaction must close on commit.
///
/// Tree mutations append the signal of every node they replace; the commit
/// closes them all after the new root map is published. Close order within
/// one commit is unspecified. Signals may appear more than once (a node can
/// be copied by several operations of the same transaction); `close` being
/// idempotent makes that harmless.
#[derive(Debug, Default)]
pub struct WatchSet {
    signals: Vec<WatchSignal>,
}

impl WatchSet {
    /// Creates an empty watch set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signal to the set.
    pub fn add(&mut self, signal: WatchSignal) {
        self.signals.push(signal);
    }

    /// Moves all signals from `other` into this set.
    pub fn merge(&mut self, other: WatchSet) {
        self.signals.extend(other.signals);
    }

    /// Returns the number of collected signals (including duplicates).
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Returns true if no signals have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Closes every collected signal and empties the set.
    pub fn close_all(&mut self) {
        for signal in self.signals.drain(..) {
            signal.close();
        }
    }
}
