//! Throttle and delay byte streams against a discrete tick source.
//!
//! This crate provides decorators for [std::io::Read] and [std::io::Write] that simulate
//! network-like impairments. Rather than consulting the wall clock, every decorator is driven
//! by a [ticks::TickSource]: a monotonically increasing counter advanced by some external driver.
//! When the driver is a [ticks::Manual] source, the behavior of a decorated stream is a pure
//! function of the ticks advanced, which makes tests of slow or laggy I/O reproducible.
//!
//! # Decorators
//!
//! - [limit::Reader] and [limit::Writer] transfer at most `bytes_per_tick` bytes per window of
//!   `prescale` ticks, blocking the caller until the next window once the budget is spent.
//! - [delay::Reader] holds every byte pulled from the underlying stream for `delay` ticks before
//!   releasing it, buffering at most `buffer_size` bytes at once.
//!
//! Any decorator can be closed from another thread with a [signal::Closer], which wakes a call
//! blocked on the tick source.
//!
//! # Example
//!
//! ```rust
//! use std::io::Read;
//! use tickshape_streams::{limit, ticks::Manual};
//!
//! let source = Manual::new();
//! let base = std::io::Cursor::new(vec![7u8; 25]);
//! let cfg = limit::Config { bytes_per_tick: 10, prescale: 1 };
//! let mut reader = limit::Reader::new(base, source.clone(), cfg).unwrap();
//!
//! let mut buf = [0u8; 64];
//! assert_eq!(reader.read(&mut buf).unwrap(), 10);
//! source.advance();
//! assert_eq!(reader.read(&mut buf).unwrap(), 10);
//! ```

use std::io;
use thiserror::Error;

pub mod delay;
pub mod limit;
pub mod signal;
pub mod ticks;

/// A discrete point in time as reported by a [ticks::TickSource].
pub type Tick = u64;

/// Errors that can occur when configuring or operating a decorator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bytes per tick must be positive")]
    ZeroRate,
    #[error("prescale must be positive")]
    ZeroPrescale,
    #[error("delay must be positive")]
    ZeroDelay,
    #[error("buffer size must be positive")]
    ZeroBufferSize,
    #[error("tick interval must be positive")]
    ZeroInterval,
    #[error("closed")]
    Closed,
    #[error("spawn failed: {0}")]
    SpawnFailed(io::Error),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Closed => io::ErrorKind::BrokenPipe,
            Error::SpawnFailed(err) => err.kind(),
            _ => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}

/// Limit the rate at which bytes can be read from `base`.
///
/// See [limit::Reader::new].
pub fn limit_read<R: io::Read, S: ticks::TickSource>(
    base: R,
    source: S,
    bytes_per_tick: usize,
    prescale: u64,
) -> Result<limit::Reader<R, S>, Error> {
    limit::Reader::new(
        base,
        source,
        limit::Config {
            bytes_per_tick,
            prescale,
        },
    )
}

/// Limit the rate at which bytes can be written to `base`.
///
/// See [limit::Writer::new].
pub fn limit_write<W: io::Write, S: ticks::TickSource>(
    base: W,
    source: S,
    bytes_per_tick: usize,
    prescale: u64,
) -> Result<limit::Writer<W, S>, Error> {
    limit::Writer::new(
        base,
        source,
        limit::Config {
            bytes_per_tick,
            prescale,
        },
    )
}

/// Delay every byte read from `base` by `delay` ticks.
///
/// See [delay::Reader::new].
pub fn delay_read<R: io::Read, S: ticks::TickSource>(
    base: R,
    source: S,
    delay: u64,
    buffer_size: usize,
) -> Result<delay::Reader<R, S>, Error> {
    delay::Reader::new(base, source, delay::Config { delay, buffer_size })
}
