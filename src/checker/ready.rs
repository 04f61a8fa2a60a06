//! Readiness gate that can be closed and reopened across restarts.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct GateState {
    open: bool,
    generation: u64,
}

/// Waiters block until the gate opens. Each open bumps a generation counter,
/// so a waiter that arrived while the gate was closed is released by the
/// next open even if the gate closes again before it wakes.
#[derive(Default)]
pub struct ReadyGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self) {
        let mut state = self.lock();
        state.open = true;
        state.generation += 1;
        self.cond.notify_all();
    }

    pub fn close(&self) {
        self.lock().open = false;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn wait(&self) {
        let state = self.lock();
        if state.open {
            return;
        }
        let seen = state.generation;
        let _state = self
            .cond
            .wait_while(state, |s| s.generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns whether
    /// the gate opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if state.open {
            return true;
        }
        let seen = state.generation;
        let (_state, result) = self
            .cond
            .wait_timeout_while(state, timeout, |s| s.generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}
