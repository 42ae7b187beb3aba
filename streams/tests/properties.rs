//! Randomized checks of the invariants every decorator must uphold.

mod common;

use common::{Driver, Stamped};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use std::{
    io::{self, Cursor, Read, Write},
    thread,
};
use tickshape_streams::{
    delay, limit,
    ticks::{Manual, TickSource},
};

fn random_data(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

#[test]
fn test_budget_bounded_per_window() {
    let mut rng = StdRng::seed_from_u64(0);
    for _ in 0..50 {
        let bytes_per_tick = rng.gen_range(1..=64);
        let prescale = rng.gen_range(1..=5);
        let windows = rng.gen_range(1..=10);
        let source = Manual::starting_at(rng.gen_range(0..1_000));
        let cfg = limit::Config {
            bytes_per_tick,
            prescale,
        };
        let mut reader = limit::Reader::new(io::repeat(0xAA), source.clone(), cfg).unwrap();

        let mut total = 0;
        let mut buf = vec![0u8; 128];
        for _ in 0..windows {
            // Drain everything available in this window without blocking
            loop {
                let available = reader.remaining();
                if available == 0 {
                    break;
                }
                let len = rng.gen_range(1..=buf.len());
                let read = reader.read(&mut buf[..len]).unwrap();
                assert!(read > 0 && read <= available);
                total += read;
            }

            // No budget reappears before the window ends
            for _ in 1..prescale {
                source.advance();
                assert_eq!(reader.remaining(), 0);
            }
            source.advance();
        }
        assert_eq!(total, windows as usize * bytes_per_tick);
        assert_eq!(reader.metrics().transferred.get(), total as u64);
    }
}

#[test]
fn test_rate_limited_read_preserves_bytes() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..20 {
        let len = rng.gen_range(0..2_048);
        let data = random_data(&mut rng, len);
        let chunk = rng.gen_range(1..=32);
        let cfg = limit::Config {
            bytes_per_tick: rng.gen_range(1..=256),
            prescale: rng.gen_range(1..=3),
        };
        let source = Manual::new();
        let (inner, _) = Stamped::new(&source, data.clone(), chunk);
        let mut reader = limit::Reader::new(inner, source.clone(), cfg).unwrap();

        let driver = Driver::start(&source);
        let mut received = Vec::new();
        let mut buf = vec![0u8; 512];
        loop {
            let len = rng.gen_range(0..=buf.len());
            let read = reader.read(&mut buf[..len]).unwrap();
            if read == 0 && len > 0 {
                break;
            }
            received.extend_from_slice(&buf[..read]);
        }
        drop(driver);
        assert_eq!(received, data);
    }
}

#[test]
fn test_rate_limited_write_preserves_bytes() {
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..20 {
        let len = rng.gen_range(0..2_048);
        let data = random_data(&mut rng, len);
        let cfg = limit::Config {
            bytes_per_tick: rng.gen_range(1..=256),
            prescale: rng.gen_range(1..=3),
        };
        let source = Manual::new();
        let mut writer = limit::Writer::new(Vec::new(), source.clone(), cfg.clone()).unwrap();

        let driver = Driver::start(&source);
        let mut offset = 0;
        while offset < data.len() {
            let len = rng.gen_range(0..=(data.len() - offset));
            writer.write_all(&data[offset..offset + len]).unwrap();
            offset += len;
        }
        writer.flush().unwrap();
        drop(driver);

        // Every window moved at most the configured number of bytes
        let windows = source.current() / cfg.prescale + 1;
        assert!(data.len() as u64 <= windows * cfg.bytes_per_tick as u64);
        assert_eq!(writer.into_inner(), data);
    }
}

#[test]
fn test_delay_lower_bound_and_buffer_bound() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..20 {
        let len = rng.gen_range(1..512);
        let data = random_data(&mut rng, len);
        let chunk = rng.gen_range(1..=16);
        let cfg = delay::Config {
            delay: rng.gen_range(1..=5),
            buffer_size: rng.gen_range(1..=64),
        };
        let source = Manual::new();
        let (inner, pulled) = Stamped::new(&source, data.clone(), chunk);
        let mut reader = delay::Reader::new(inner, source.clone(), cfg.clone()).unwrap();

        let buffer_size = cfg.buffer_size;
        let consumer = {
            let source = source.clone();
            let seed = rng.gen();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut released = Vec::new();
                let mut buf = vec![0u8; 128];
                loop {
                    let len = rng.gen_range(1..=buf.len());
                    let read = reader.read(&mut buf[..len]).unwrap();
                    assert!(reader.buffered() <= buffer_size);
                    if read == 0 {
                        return released;
                    }
                    let tick = source.current();
                    released.extend(buf[..read].iter().map(|byte| (*byte, tick)));
                }
            })
        };
        let driver = Driver::start(&source);
        let released = consumer.join().unwrap();
        drop(driver);

        let bytes: Vec<u8> = released.iter().map(|(byte, _)| *byte).collect();
        assert_eq!(bytes, data);

        let pulled = pulled.lock().unwrap();
        assert_eq!(pulled.len(), data.len());
        for ((_, released_at), pulled_at) in released.iter().zip(pulled.iter()) {
            assert!(*released_at >= pulled_at + cfg.delay);
        }
    }
}

#[test]
fn test_zero_length_requests_never_block() {
    let source = Manual::new();
    let cfg = limit::Config {
        bytes_per_tick: 1,
        prescale: 1,
    };
    let mut reader = limit::Reader::new(io::repeat(1), source.clone(), cfg.clone()).unwrap();
    let mut writer = limit::Writer::new(io::sink(), source.clone(), cfg).unwrap();
    let mut delayed = delay::Reader::new(
        Cursor::new(vec![1, 2, 3]),
        source.clone(),
        delay::Config {
            delay: 100,
            buffer_size: 1,
        },
    )
    .unwrap();

    // Spend the budgets so that any non-empty request would block
    reader.read_exact(&mut [0u8; 1]).unwrap();
    writer.write_all(&[0u8; 1]).unwrap();
    delayed.fill().unwrap();

    for _ in 0..10 {
        assert_eq!(reader.read(&mut []).unwrap(), 0);
        assert_eq!(writer.write(&[]).unwrap(), 0);
        assert_eq!(delayed.read(&mut []).unwrap(), 0);
    }
    assert_eq!(reader.metrics().waits.get(), 0);
    assert_eq!(writer.metrics().waits.get(), 0);
    assert_eq!(delayed.metrics().waits.get(), 0);
    assert_eq!(source.current(), 0);
}
