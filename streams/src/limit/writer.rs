use super::{Budget, Config, Metrics};
use crate::{
    signal::{Closer, Signal},
    ticks::TickSource,
    Error,
};
use prometheus_client::registry::Registry;
use std::io::{self, Write};
use tracing::{debug, trace};

/// A [Write] decorator that forwards at most `bytes_per_tick` bytes per window of `prescale`
/// ticks.
///
/// [Write::write] forwards as much of the buffer as the current budget allows and blocks on the
/// [TickSource] only when the budget is already spent. [Write::write_all] therefore spreads a
/// large buffer across as many windows as it needs.
///
/// Nothing is staged inside the decorator: every accepted byte has already been handed to the
/// underlying stream, so [Write::flush] simply flushes it.
pub struct Writer<W: Write, S: TickSource> {
    inner: W,
    source: S,
    budget: Budget,
    signal: Signal,
    metrics: Metrics,
}

impl<W: Write, S: TickSource> Writer<W, S> {
    /// Wrap `inner`, starting the first window at the current tick of `source`.
    pub fn new(inner: W, source: S, cfg: Config) -> Result<Self, Error> {
        let origin = source.current();
        let budget = Budget::new(&cfg, origin)?;
        debug!(
            bytes_per_tick = cfg.bytes_per_tick,
            prescale = cfg.prescale,
            origin,
            "created rate-limited writer"
        );
        Ok(Self {
            inner,
            source,
            budget,
            signal: Signal::new(),
            metrics: Metrics::default(),
        })
    }

    /// Returns a handle that closes this writer from any thread.
    pub fn closer(&self) -> Closer<S> {
        Closer::new(self.signal.clone(), self.source.clone())
    }

    /// Returns the number of bytes that can be written without blocking at the current tick.
    pub fn remaining(&mut self) -> usize {
        self.refresh();
        self.budget.remaining()
    }

    /// Returns the metrics of this writer.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Register the metrics of this writer.
    pub fn register(&self, registry: &mut Registry) {
        self.metrics.register(registry);
    }

    /// Returns a reference to the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns a mutable reference to the underlying stream.
    ///
    /// Writing directly to the underlying stream bypasses the rate limit.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Flush and close this writer, dropping the underlying stream.
    ///
    /// The underlying stream is dropped even if the flush fails.
    pub fn close(mut self) -> io::Result<()> {
        let result = if self.signal.is_raised() {
            Ok(())
        } else {
            self.inner.flush()
        };
        self.signal.raise();
        debug!("closed rate-limited writer");
        result
    }

    fn refresh(&mut self) {
        if self.budget.refresh(self.source.current()) {
            self.metrics.replenishments.inc();
        }
    }
}

impl<W: Write, S: TickSource> Write for Writer<W, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
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
                let written = self.inner.write(&buf[..allowed])?;
                self.budget.consume(written);
                self.metrics.transferred.inc_by(written as u64);
                return Ok(written);
            }

            let target = self.budget.next_window();
            trace!(until = target, pending = buf.len(), "waiting for budget");
            self.metrics.waits.inc();
            if self.source.wait_until(target, &self.signal).is_none() {
                return Err(Error::Closed.into());
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.signal.is_raised() {
            return Err(Error::Closed.into());
        }
        self.inner.flush()
    }
}
