use super::{Pulse, TickSource};
use crate::{signal::Signal, Error, Tick};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

struct Inner {
    pulse: Pulse,
    stopped: AtomicBool,
}

/// A [TickSource] advanced by a background thread once per wall-clock `interval`.
///
/// Ticks are scheduled against absolute deadlines (`start + n * interval`), so a late wakeup
/// does not push back every subsequent tick. The thread exits once [Periodic::stop] is called
/// or every handle has been dropped.
#[derive(Clone)]
pub struct Periodic {
    inner: Arc<Inner>,
}

impl Periodic {
    /// Start a new source at tick 0 that advances once per `interval`.
    pub fn start(interval: Duration) -> Result<Self, Error> {
        if interval.is_zero() {
            return Err(Error::ZeroInterval);
        }
        let inner = Arc::new(Inner {
            pulse: Pulse::new(0),
            stopped: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("tick-periodic".into())
            .spawn(move || run(weak, interval))
            .map_err(Error::SpawnFailed)?;
        debug!(?interval, "started periodic tick source");
        Ok(Self { inner })
    }

    /// Stop advancing. The current tick is retained and waiters are not released.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if [Periodic::stop] has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

/// Absolute deadlines spaced `interval` apart.
struct Schedule {
    deadline: Instant,
    interval: Duration,
}

impl Schedule {
    fn new(start: Instant, interval: Duration) -> Self {
        Self {
            deadline: start,
            interval,
        }
    }

    fn next(&mut self) -> Instant {
        self.deadline += self.interval;
        self.deadline
    }
}

fn run(inner: Weak<Inner>, interval: Duration) {
    let mut schedule = Schedule::new(Instant::now(), interval);
    loop {
        let deadline = schedule.next();
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }

        let Some(strong) = inner.upgrade() else {
            debug!("all periodic tick source handles dropped");
            return;
        };
        if strong.stopped.load(Ordering::SeqCst) {
            debug!(tick = strong.pulse.current(), "periodic tick source stopped");
            return;
        }
        strong.pulse.advance(1);
    }
}

impl TickSource for Periodic {
    fn current(&self) -> Tick {
        self.inner.pulse.current()
    }

    fn wait_until(&self, target: Tick, signal: &Signal) -> Option<Tick> {
        self.inner.pulse.wait_until(target, signal)
    }

    fn interrupt(&self) {
        self.inner.pulse.interrupt()
    }
}
