#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
use tickshape_streams::{
    ticks::{Manual, TickSource},
    Tick,
};
use tracing::Level;

/// Route trace output of the crate under test to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Advance `source` by a single tick every time some thread is blocked on it, until stopped.
pub struct Driver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    pub fn start(source: &Manual) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let source = source.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    if source.waiting() > 0 {
                        source.advance();
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

/// Block until some thread waits on `source`, then advance it by one tick.
pub fn step_when_blocked(source: &Manual) -> Tick {
    while source.waiting() == 0 {
        thread::yield_now();
    }
    source.advance()
}

/// A stream that yields at most `chunk` bytes per read and logs the tick of every byte read.
pub struct Stamped {
    source: Manual,
    data: VecDeque<u8>,
    chunk: usize,
    log: Arc<Mutex<Vec<Tick>>>,
}

impl Stamped {
    pub fn new(source: &Manual, data: Vec<u8>, chunk: usize) -> (Self, Arc<Mutex<Vec<Tick>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stamped = Self {
            source: source.clone(),
            data: data.into(),
            chunk,
            log: log.clone(),
        };
        (stamped, log)
    }
}

impl Read for Stamped {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let tick = self.source.current();
        let take = buf.len().min(self.chunk).min(self.data.len());
        let mut log = self.log.lock().unwrap();
        for (slot, byte) in buf.iter_mut().zip(self.data.drain(..take)) {
            *slot = byte;
            log.push(tick);
        }
        Ok(take)
    }
}
