use super::{Pulse, TickSource};
use crate::{signal::Signal, Tick};
use std::sync::Arc;

/// A [TickSource] that only advances when told to.
///
/// # Example
///
/// ```rust
/// use tickshape_streams::ticks::{Manual, TickSource};
///
/// let source = Manual::new();
/// assert_eq!(source.current(), 0);
/// assert_eq!(source.advance(), 1);
/// assert_eq!(source.advance_by(3), 4);
/// ```
#[derive(Clone)]
pub struct Manual {
    pulse: Arc<Pulse>,
}

impl Default for Manual {
    fn default() -> Self {
        Self::new()
    }
}

impl Manual {
    /// Create a new source at tick 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a new source at the given tick.
    pub fn starting_at(tick: Tick) -> Self {
        Self {
            pulse: Arc::new(Pulse::new(tick)),
        }
    }

    /// Advance by a single tick, returning the new tick.
    pub fn advance(&self) -> Tick {
        self.pulse.advance(1)
    }

    /// Advance by `ticks`, returning the new tick.
    ///
    /// # Panics
    ///
    /// Panics if the tick would overflow.
    pub fn advance_by(&self, ticks: u64) -> Tick {
        self.pulse.advance(ticks)
    }

    /// Returns the number of threads currently blocked on this source.
    ///
    /// Tests use this to step the source only once a decorator is parked.
    pub fn waiting(&self) -> usize {
        self.pulse.waiting()
    }
}

impl TickSource for Manual {
    fn current(&self) -> Tick {
        self.pulse.current()
    }

    fn wait_until(&self, target: Tick, signal: &Signal) -> Option<Tick> {
        self.pulse.wait_until(target, signal)
    }

    fn interrupt(&self) {
        self.pulse.interrupt()
    }
}
