//! Delay every byte of a stream by a fixed number of ticks.
//!
//! [Reader] pulls bytes from an underlying stream into a bounded buffer, stamping each pull with
//! the tick at which it completed. A byte pulled at tick `t` is released to the caller no earlier
//! than tick `t + delay`, in the same order it was pulled. End-of-stream is buffered like data: it
//! is reported only after every byte before it has been released and its own delay has elapsed.
//!
//! [Reader::read] only reads the underlying stream when nothing is pending, so bytes that are
//! already buffered are never held back by a read that waits for more data. Callers that know
//! the underlying stream has data ready can prime the buffer with [Reader::fill] at any tick.
//!
//! The buffer never holds more than `buffer_size` bytes. While it is full (and nothing is
//! eligible yet) the underlying stream is not read, so a slow consumer exerts backpressure
//! instead of growing memory.
//!
//! # Example
//!
//! ```rust
//! use std::io::Read;
//! use tickshape_streams::{delay, ticks::Manual};
//!
//! let source = Manual::new();
//! let base = std::io::Cursor::new(b"ping".to_vec());
//! let cfg = delay::Config { delay: 2, buffer_size: 16 };
//! let mut reader = delay::Reader::new(base, source.clone(), cfg).unwrap();
//!
//! // Pull without releasing anything
//! assert_eq!(reader.fill().unwrap(), 4);
//! let mut buf = [0u8; 4];
//! assert_eq!(reader.try_read(&mut buf).unwrap(), None);
//!
//! source.advance_by(2);
//! assert_eq!(reader.read(&mut buf).unwrap(), 4);
//! assert_eq!(&buf, b"ping");
//! ```

use crate::{
    signal::{Closer, Signal},
    ticks::TickSource,
    Error, Tick,
};
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{
    collections::VecDeque,
    io::{self, Read},
};
use tracing::{debug, trace};

/// Configuration for a delayed stream.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of ticks each byte is held before it is released.
    pub delay: u64,

    /// Maximum number of bytes buffered at once.
    pub buffer_size: usize,
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if self.delay == 0 {
            return Err(Error::ZeroDelay);
        }
        if self.buffer_size == 0 {
            return Err(Error::ZeroBufferSize);
        }
        Ok(())
    }
}

/// Metrics exposed by a delayed stream.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Bytes released to the caller.
    pub transferred: Counter,
    /// Bytes pulled from the underlying stream.
    pub pulled: Counter,
    /// Times the decorator blocked on the tick source.
    pub waits: Counter,
    /// Bytes currently buffered.
    pub buffered: Gauge,
}

impl Metrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "transferred",
            "Bytes released after their delay",
            self.transferred.clone(),
        );
        registry.register(
            "pulled",
            "Bytes pulled from the underlying stream",
            self.pulled.clone(),
        );
        registry.register(
            "waits",
            "Number of times the stream blocked waiting for a tick",
            self.waits.clone(),
        );
        registry.register(
            "buffered",
            "Bytes currently held in the delay buffer",
            self.buffered.clone(),
        );
    }
}

/// Bytes pulled together at the same tick.
struct Segment {
    at: Tick,
    len: usize,
}

/// A [Read] decorator that releases each byte `delay` ticks after it was pulled.
pub struct Reader<R: Read, S: TickSource> {
    inner: R,
    source: S,
    delay: u64,
    buffer_size: usize,

    data: VecDeque<u8>,
    segments: VecDeque<Segment>,
    eof: Option<Tick>,
    scratch: Vec<u8>,

    signal: Signal,
    metrics: Metrics,
}

impl<R: Read, S: TickSource> Reader<R, S> {
    /// Wrap `inner`, holding every byte for `cfg.delay` ticks and buffering at most
    /// `cfg.buffer_size` bytes.
    pub fn new(inner: R, source: S, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        debug!(
            delay = cfg.delay,
            buffer_size = cfg.buffer_size,
            "created delayed reader"
        );
        Ok(Self {
            inner,
            source,
            delay: cfg.delay,
            buffer_size: cfg.buffer_size,
            data: VecDeque::with_capacity(cfg.buffer_size),
            segments: VecDeque::new(),
            eof: None,
            scratch: vec![0; cfg.buffer_size],
            signal: Signal::new(),
            metrics: Metrics::default(),
        })
    }

    /// Returns a handle that closes this reader from any thread.
    pub fn closer(&self) -> Closer<S> {
        Closer::new(self.signal.clone(), self.source.clone())
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` once the underlying stream has reported end-of-stream.
    ///
    /// Buffered bytes may still be pending release.
    pub fn is_exhausted(&self) -> bool {
        self.eof.is_some()
    }

    /// Returns the metrics of this reader.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Register the metrics of this reader.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the underlying stream, discarding anything still buffered.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Close this reader, dropping the underlying stream and anything still buffered.
    pub fn close(self) {
        self.signal.raise();
        debug!(buffered = self.data.len(), "closed delayed reader");
    }

    /// Pull once from the underlying stream into the free space of the buffer, stamping the
    /// bytes with the current tick.
    ///
    /// Returns the number of bytes pulled. Nothing is pulled (and `0` is returned) when the
    /// buffer is full or end-of-stream has already been observed. This call may block on the
    /// underlying stream but never on the tick source.
    pub fn fill(&mut self) -> io::Result<usize> {
        if self.signal.is_raised() {
            return Err(Error::Closed.into());
        }
        self.pull()
    }

    /// Release eligible bytes without blocking.
    ///
    /// Returns `Ok(None)` when nothing can be released at the current tick and `Ok(Some(0))`
    /// when `buf` is empty or only an eligible end-of-stream remains.
    pub fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.signal.is_raised() {
            return Err(Error::Closed.into());
        }
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let now = self.source.current();
        Ok(self.release(buf, now))
    }

    fn space(&self) -> usize {
        self.buffer_size - self.data.len()
    }

    fn can_pull(&self) -> bool {
        self.eof.is_none() && self.space() > 0
    }

    fn pull(&mut self) -> io::Result<usize> {
        if !self.can_pull() {
            return Ok(0);
        }
        let space = self.space();
        let read = self.inner.read(&mut self.scratch[..space])?;
        let at = self.source.current();
        if read == 0 {
            debug!(tick = at, "underlying stream exhausted");
            self.eof = Some(at);
            return Ok(0);
        }

        self.data.extend(&self.scratch[..read]);
        self.segments.push_back(Segment { at, len: read });
        self.metrics.pulled.inc_by(read as u64);
        self.metrics.buffered.set(self.data.len() as i64);
        trace!(tick = at, read, buffered = self.data.len(), "pulled");
        Ok(read)
    }

    /// Returns the tick at which the oldest buffered item (byte or end-of-stream) is released.
    fn next_release(&self) -> Option<Tick> {
        self.segments
            .front()
            .map(|segment| segment.at)
            .or(self.eof)
            .map(|at| at.saturating_add(self.delay))
    }

    /// Copy every eligible byte (oldest first) into `buf`.
    fn release(&mut self, buf: &mut [u8], now: Tick) -> Option<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(segment) = self.segments.front_mut() else {
                break;
            };
            if segment.at.saturating_add(self.delay) > now {
                break;
            }
            let take = segment.len.min(buf.len() - copied);
            for (slot, byte) in buf[copied..copied + take]
                .iter_mut()
                .zip(self.data.drain(..take))
            {
                *slot = byte;
            }
            copied += take;
            segment.len -= take;
            if segment.len == 0 {
                self.segments.pop_front();
            }
        }
        if copied > 0 {
            self.metrics.transferred.inc_by(copied as u64);
            self.metrics.buffered.set(self.data.len() as i64);
            return Some(copied);
        }

        // End-of-stream is only eligible once every byte before it is gone
        match self.eof {
            Some(at) if self.segments.is_empty() && at.saturating_add(self.delay) <= now => {
                Some(0)
            }
            _ => None,
        }
    }
}

impl<R: Read, S: TickSource> Read for Reader<R, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.signal.is_raised() {
            return Err(Error::Closed.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let now = self.source.current();
            if let Some(released) = self.release(buf, now) {
                return Ok(released);
            }

            // Only pull when nothing is pending: a pull may block on the underlying
            // stream and must never hold back a byte that is about to become eligible
            if self.segments.is_empty() && self.eof.is_none() {
                self.pull()?;
            }
            let Some(target) = self.next_release() else {
                continue;
            };
            trace!(tick = now, until = target, buffered = self.data.len(), "waiting");
            self.metrics.waits.inc();
            if self.source.wait_until(target, &self.signal).is_none() {
                return Err(Error::Closed.into());
            }
        }
    }
}
