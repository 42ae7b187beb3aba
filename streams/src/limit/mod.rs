//! Limit the throughput of a stream to a number of bytes per tick.
//!
//! Time is divided into windows of `prescale` ticks, measured from the tick at which the
//! decorator was created. At the start of every window the budget is set to `bytes_per_tick`
//! (unused budget from an earlier window is discarded). A read or write transfers at most the
//! remaining budget and, once the budget is spent, blocks until the next window begins.
//!
//! A `prescale` larger than 1 expresses rates below one byte per tick: with
//! `bytes_per_tick = 1` and `prescale = 4` the stream moves a single byte every four ticks.
//! Consequently, over any `n` consecutive windows at most `n * bytes_per_tick` bytes are
//! transferred. A span of `n * prescale` ticks that does not start on a window boundary touches
//! `n + 1` windows and can therefore see up to `(n + 1) * bytes_per_tick` bytes.

use crate::{Error, Tick};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use tracing::trace;

mod reader;
pub use reader::Reader;
mod writer;
pub use writer::Writer;

/// Configuration for a rate-limited stream.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of bytes that may be transferred per window.
    pub bytes_per_tick: usize,

    /// Number of ticks in a window.
    pub prescale: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bytes_per_tick: 1,
            prescale: 1,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if self.bytes_per_tick == 0 {
            return Err(Error::ZeroRate);
        }
        if self.prescale == 0 {
            return Err(Error::ZeroPrescale);
        }
        Ok(())
    }
}

/// Metrics exposed by a rate-limited stream.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Bytes that passed through the decorator.
    pub transferred: Counter,
    /// Times the decorator blocked on the tick source.
    pub waits: Counter,
    /// Windows in which the budget was replenished.
    pub replenishments: Counter,
}

impl Metrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "transferred",
            "Bytes that passed through the rate limit",
            self.transferred.clone(),
        );
        registry.register(
            "waits",
            "Number of times the stream blocked waiting for budget",
            self.waits.clone(),
        );
        registry.register(
            "replenishments",
            "Number of windows in which the budget was replenished",
            self.replenishments.clone(),
        );
    }
}

/// Bytes that may still be transferred in the current window.
struct Budget {
    bytes_per_tick: usize,
    prescale: u64,
    origin: Tick,
    window: u64,
    remaining: usize,
}

impl Budget {
    /// Create a budget whose first window starts at `origin` with a full allowance.
    fn new(cfg: &Config, origin: Tick) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self {
            bytes_per_tick: cfg.bytes_per_tick,
            prescale: cfg.prescale,
            origin,
            window: 0,
            remaining: cfg.bytes_per_tick,
        })
    }

    /// Replenish the budget if `now` falls in a later window than the last one observed.
    ///
    /// Returns `true` if the budget was replenished.
    fn refresh(&mut self, now: Tick) -> bool {
        let window = now.saturating_sub(self.origin) / self.prescale;
        if window <= self.window {
            return false;
        }
        trace!(
            tick = now,
            skipped = window - self.window - 1,
            unused = self.remaining,
            "replenishing budget"
        );
        self.window = window;
        self.remaining = self.bytes_per_tick;
        true
    }

    fn remaining(&self) -> usize {
        self.remaining
    }

    fn consume(&mut self, bytes: usize) {
        assert!(bytes <= self.remaining, "consumed more than budget");
        self.remaining -= bytes;
    }

    /// Returns the first tick of the window following the last one observed.
    fn next_window(&self) -> Tick {
        self.window
            .saturating_add(1)
            .saturating_mul(self.prescale)
            .saturating_add(self.origin)
    }
}
