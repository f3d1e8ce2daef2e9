//! Trigger/done handshake between the coordinator and its workers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Reclaim a lock even when a previous holder panicked. The shared state
/// behind every pipeline lock stays usable after a worker dies.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct CellState {
    cycle: u64,
    completed: u64,
    cancelled: bool,
}

/// One worker's cycle handshake.
///
/// The coordinator advances `cycle` to trigger a run, the worker reports
/// back through `completed`. Triggers issued while the worker is busy
/// coalesce into one pending cycle. Cancelling wakes both sides out of any
/// wait, so a stopping pipeline never hangs on a barrier.
#[derive(Debug, Default)]
pub(crate) struct WorkerCell {
    state: Mutex<CellState>,
    trigger: Condvar,
    done: Condvar,
}

impl WorkerCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the next cycle.
    pub fn trigger(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.cycle += 1;
        self.trigger.notify_all();
    }

    /// The cycle the most recent trigger started.
    pub fn current_cycle(&self) -> u64 {
        lock_unpoisoned(&self.state).cycle
    }

    /// Worker side: sleep until a cycle newer than `last_seen` is
    /// triggered. Returns the cycle to run, or `None` once cancelled.
    pub fn await_trigger(&self, last_seen: u64) -> Option<u64> {
        let mut state = lock_unpoisoned(&self.state);
        while !state.cancelled && state.cycle == last_seen {
            state = self
                .trigger
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.cancelled {
            None
        } else {
            Some(state.cycle)
        }
    }

    /// Worker side: report `cycle` as finished.
    pub fn mark_done(&self, cycle: u64) {
        let mut state = lock_unpoisoned(&self.state);
        if cycle > state.completed {
            state.completed = cycle;
        }
        self.done.notify_all();
    }

    /// Coordinator side: wait until `cycle` is reported done. Returns
    /// `false` when `deadline` passes first or the cell is cancelled.
    pub fn wait_done(&self, cycle: u64, deadline: Instant) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        loop {
            if state.completed >= cycle {
                return true;
            }
            if state.cancelled {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            state = self
                .done
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark the cell cancelled and wake both sides.
    pub fn cancel(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.cancelled = true;
        self.trigger.notify_all();
        self.done.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        lock_unpoisoned(&self.state).cancelled
    }
}
