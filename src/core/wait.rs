//! Bounded wait on an asynchronous completion.
//!
//! An engine callback calls [`Completion::signal`]; the caller blocks in
//! [`Completion::wait_timeout`] until signalled or the timeout elapses.
//! Signalling before the wait starts is not lost.
//!
//! [`ScopedSubscription`] ties an engine subscription to a scope so every
//! exit path (completion, timeout, early error) unsubscribes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::engine::{EngineEventKind, EngineHandler, EngineSubscription, MediaEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signalled,
    TimedOut,
}

#[derive(Default)]
struct Inner {
    done: Mutex<bool>,
    cond: Condvar,
}

/// One-shot completion latch, cloneable into callbacks
#[derive(Clone, Default)]
pub struct Completion {
    inner: Arc<Inner>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.cond.notify_all();
    }

    pub fn is_signalled(&self) -> bool {
        *self.inner.done.lock()
    }

    /// Block until signalled or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut done = self.inner.done.lock();
        // Loop guards against spurious wakeups
        while !*done {
            if self.inner.cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        if *done {
            WaitOutcome::Signalled
        } else {
            WaitOutcome::TimedOut
        }
    }
}

/// Engine subscription removed on drop
pub struct ScopedSubscription<'a> {
    engine: &'a dyn MediaEngine,
    id: EngineSubscription,
}

impl<'a> ScopedSubscription<'a> {
    pub fn new(engine: &'a dyn MediaEngine, kind: EngineEventKind, handler: EngineHandler) -> Self {
        let id = engine.subscribe(kind, handler);
        Self { engine, id }
    }
}

impl Drop for ScopedSubscription<'_> {
    fn drop(&mut self) {
        self.engine.unsubscribe(self.id);
    }
}
