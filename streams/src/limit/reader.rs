use super::{Budget, Config, Metrics};
use crate::{
    signal::{Closer, Signal},
    ticks::TickSource,
    Error,
};
use prometheus_client::registry::Registry;
use std::io::{self, Read};
use tracing::{debug, trace};

/// A [Read] decorator that delivers at most `bytes_per_tick` bytes per window of `prescale`
/// ticks.
///
/// When the budget of the current window is spent, [Read::read] blocks on the [TickSource]
/// until the next window begins. Before blocking, the reader looks one byte ahead in the
/// underlying stream so that end-of-stream is reported immediately instead of after a wait.
pub struct Reader<R: Read, S: TickSource> {
    inner: R,
    source: S,
    budget: Budget,
    lookahead: Option<u8>,
    signal: Signal,
    metrics: Metrics,
}

impl<R: Read, S: TickSource> Reader<R, S> {
    /// Wrap `inner`, starting the first window at the current tick of `source`.
    pub fn new(inner: R, source: S, cfg: Config) -> Result<Self, Error> {
        let origin = source.current();
        let budget = Budget::new(&cfg, origin)?;
        debug!(
            bytes_per_tick = cfg.bytes_per_tick,
            prescale = cfg.prescale,
            origin,
            "created rate-limited reader"
        );
        Ok(Self {
            inner,
            source,
            budget,
            lookahead: None,
            signal: Signal::new(),
            metrics: Metrics::default(),
        })
    }

    /// Returns a handle that closes this reader from any thread.
    pub fn closer(&self) -> Closer<S> {
        Closer::new(self.signal.clone(), self.source.clone())
    }

    /// Returns the number of bytes that can be read without blocking at the current tick.
    pub fn remaining(&mut self) -> usize {
        self.refresh();
        self.budget.remaining()
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

    /// Returns a mutable reference to the underlying stream.
    ///
    /// Reading directly from the underlying stream bypasses the rate limit.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwrap the underlying stream.
    ///
    /// A byte already looked ahead (but not yet delivered) is discarded. Use
    /// [Reader::into_parts] to recover it.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Unwrap the underlying stream along with the byte (if any) that was read from it ahead
    /// of budget but not yet delivered.
    ///
    /// The returned byte precedes everything still readable from the underlying stream.
    pub fn into_parts(self) -> (R, Option<u8>) {
        (self.inner, self.lookahead)
    }

    /// Close this reader, dropping the underlying stream.
    pub fn close(self) {
        self.signal.raise();
        debug!("closed rate-limited reader");
    }

    fn refresh(&mut self) {
        if self.budget.refresh(self.source.current()) {
            self.metrics.replenishments.inc();
        }
    }

    /// Fill `buf` (never empty) from the lookahead byte and the underlying stream.
    fn transfer(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(byte) = self.lookahead.take() else {
            return self.inner.read(buf);
        };
        buf[0] = byte;
        if buf.len() == 1 {
            return Ok(1);
        }
        match self.inner.read(&mut buf[1..]) {
            Ok(read) => Ok(read + 1),
            Err(err) => {
                // Keep the byte for the next call
                self.lookahead = Some(byte);
                Err(err)
            }
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
            self.refresh();
            let allowed = self.budget.remaining().min(buf.len());
            if allowed > 0 {
                let read = self.transfer(&mut buf[..allowed])?;
                if read == 0 {
                    debug!("underlying stream exhausted");
                    return Ok(0);
                }
                self.budget.consume(read);
                self.metrics.transferred.inc_by(read as u64);
                return Ok(read);
            }

            // Surface end-of-stream without waiting for budget
            if self.lookahead.is_none() {
                let mut byte = [0u8; 1];
                if self.inner.read(&mut byte)? == 0 {
                    debug!("underlying stream exhausted");
                    return Ok(0);
                }
                self.lookahead = Some(byte[0]);
            }

            let target = self.budget.next_window();
            trace!(until = target, "waiting for budget");
            self.metrics.waits.inc();
            if self.source.wait_until(target, &self.signal).is_none() {
                return Err(Error::Closed.into());
            }
        }
    }
}
