//! Close a decorator from outside the thread that drives it.
//!
//! Every decorator owns a [Signal] that it checks before each operation and passes to
//! [TickSource::wait_until] whenever it blocks. A [Closer] raises that [Signal] and then
//! interrupts the tick source so that a blocked call observes the closure instead of
//! waiting for a tick that may never come.
//!
//! # Example
//!
//! ```rust
//! use std::io::Read;
//! use tickshape_streams::{limit, ticks::Manual};
//!
//! let source = Manual::new();
//! let base = std::io::repeat(1);
//! let cfg = limit::Config { bytes_per_tick: 4, prescale: 1 };
//! let mut reader = limit::Reader::new(base, source.clone(), cfg).unwrap();
//!
//! // Spend the budget of the current tick
//! let mut buf = [0u8; 4];
//! reader.read_exact(&mut buf).unwrap();
//!
//! // Close from another thread once the reader is waiting for the next tick
//! let closer = reader.closer();
//! let waiter = source.clone();
//! let handle = std::thread::spawn(move || {
//!     while waiter.waiting() == 0 {
//!         std::thread::yield_now();
//!     }
//!     closer.close();
//! });
//!
//! let err = reader.read(&mut buf).unwrap_err();
//! assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
//! handle.join().unwrap();
//! ```

use crate::ticks::TickSource;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

/// A one-way flag shared between a decorator and its [Closer]s.
#[derive(Clone, Debug, Default)]
pub struct Signal {
    raised: Arc<AtomicBool>,
}

impl Signal {
    /// Create a new [Signal] that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Raising an already raised signal has no effect.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [Signal::raise] has been called on any clone.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// A cloneable handle that closes a decorator and wakes any call blocked inside it.
///
/// Once closed, every subsequent operation on the decorator fails with
/// [std::io::ErrorKind::BrokenPipe].
#[derive(Clone)]
pub struct Closer<S: TickSource> {
    signal: Signal,
    source: S,
}

impl<S: TickSource> Closer<S> {
    pub(crate) fn new(signal: Signal, source: S) -> Self {
        Self { signal, source }
    }

    /// Close the decorator.
    pub fn close(&self) {
        if self.signal.is_raised() {
            return;
        }
        debug!("closing stream");

        // Raise before interrupting so that any waiter re-checking its predicate
        // under the source lock is guaranteed to observe the closure
        self.signal.raise();
        self.source.interrupt();
    }

    /// Returns `true` if the decorator has been closed.
    pub fn is_closed(&self) -> bool {
        self.signal.is_raised()
    }
}
