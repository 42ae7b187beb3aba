//! Sources of discrete time.
//!
//! A [TickSource] reports a monotonically non-decreasing tick count and lets any number of
//! threads block until that count reaches some threshold. Decorators only ever observe a
//! source; advancing it is the exclusive right of its driver:
//!
//! - [Manual] is advanced explicitly (typically by a test).
//! - [Periodic] is advanced by a background thread once per wall-clock interval.

use crate::{signal::Signal, Tick};
use std::{
    collections::BTreeMap,
    sync::{Condvar, Mutex},
};
use tracing::trace;

mod manual;
pub use manual::Manual;
mod periodic;
pub use periodic::Periodic;

/// Interface that any provider of ticks must implement.
///
/// Handles are cheap to clone and every clone observes the same tick count.
pub trait TickSource: Clone + Send + Sync + 'static {
    /// Returns the current tick without blocking.
    fn current(&self) -> Tick;

    /// Block until the current tick is at least `target`.
    ///
    /// Returns the tick observed when the wait ended or `None` if `signal` was raised
    /// (in which case the tick is ignored).
    fn wait_until(&self, target: Tick, signal: &Signal) -> Option<Tick>;

    /// Wake every waiter so that it re-evaluates its [Signal].
    ///
    /// The tick count is not modified.
    fn interrupt(&self);

    /// Block until the current tick is greater than `observed`.
    fn wait_past(&self, observed: Tick, signal: &Signal) -> Option<Tick> {
        self.wait_until(observed.saturating_add(1), signal)
    }
}

struct State {
    tick: Tick,
    /// Number of waiters registered per target tick.
    targets: BTreeMap<Tick, usize>,
}

/// Tick counter that threads can block on.
///
/// Waiters evaluate their predicate while holding the lock and every mutation (or interrupt)
/// notifies while holding the same lock, so an advance that races with a waiter about to park
/// can never be missed.
pub(crate) struct Pulse {
    state: Mutex<State>,
    cv: Condvar,
}

impl Pulse {
    pub(crate) fn new(start: Tick) -> Self {
        Self {
            state: Mutex::new(State {
                tick: start,
                targets: BTreeMap::new(),
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn current(&self) -> Tick {
        self.state.lock().unwrap().tick
    }

    /// Returns the number of waiters whose target has not been reached.
    ///
    /// A waiter released by an advance stops counting immediately, even before its
    /// thread is rescheduled.
    pub(crate) fn waiting(&self) -> usize {
        let state = self.state.lock().unwrap();
        let Some(next) = state.tick.checked_add(1) else {
            return 0;
        };
        state.targets.range(next..).map(|(_, count)| count).sum()
    }

    /// Advance the tick by `ticks` and release every satisfied waiter.
    pub(crate) fn advance(&self, ticks: u64) -> Tick {
        let mut state = self.state.lock().unwrap();
        state.tick = state.tick.checked_add(ticks).expect("tick overflowed");
        trace!(tick = state.tick, "advanced");
        self.cv.notify_all();
        state.tick
    }

    pub(crate) fn wait_until(&self, target: Tick, signal: &Signal) -> Option<Tick> {
        let mut state = self.state.lock().unwrap();
        *state.targets.entry(target).or_default() += 1;
        let result = loop {
            if signal.is_raised() {
                break None;
            }
            if state.tick >= target {
                break Some(state.tick);
            }
            state = self.cv.wait(state).unwrap();
        };
        if let Some(count) = state.targets.get_mut(&target) {
            *count -= 1;
            if *count == 0 {
                state.targets.remove(&target);
            }
        }
        result
    }

    pub(crate) fn interrupt(&self) {
        let _state = self.state.lock().unwrap();
        self.cv.notify_all();
    }
}
