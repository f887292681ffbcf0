// src/histogram.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram for latency samples, cheap enough for the hot path to share
/// between any number of writers. Samples land in fixed buckets:
///   - under 1ms
///   - 1 to 5ms
///   - 5 to 10ms
///   - 10 to 20ms
///   - 20 to 50ms
///   - 50 to 100ms
///   - 100 to 250ms
///   - 250 to 1000ms
///   - 1000 to 2000ms
///   - over 2000ms
#[derive(Debug)]
pub struct Histogram {
    data: [AtomicU64; 10],
}

const BUCKET_BOUNDS_US: [u64; 9] = [
    1_000, 5_000, 10_000, 20_000, 50_000, 100_000, 250_000, 1_000_000, 2_000_000,
];

impl Histogram {
    pub fn new() -> Self {
        Histogram {
            data: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn add(&self, sample: Duration) {
        let usec = sample.as_micros() as u64;
        let bucket = BUCKET_BOUNDS_US
            .iter()
            .position(|&bound| usec < bound)
            .unwrap_or(9);
        self.data[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in &self.data {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn counts(&self) -> [u64; 10] {
        std::array::from_fn(|i| self.data[i].load(Ordering::Relaxed))
    }

    /// Total number of recorded samples.
    pub fn total(&self) -> u64 {
        self.counts().iter().sum()
    }

    pub fn headers() -> &'static str {
        "< 1ms,  5ms,  10ms,  20ms,  50ms, 100ms, 250ms, 1sec, 2sec, >2sec"
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.counts();
        // Widths line up with the header columns.
        write!(
            f,
            "{:5},{:5},{:6},{:6},{:6},{:6},{:6},{:5},{:5},{:6}",
            c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], c[8], c[9]
        )
    }
}
