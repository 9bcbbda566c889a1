//! Throughput sampling with a minimum emission interval.

use std::time::{Duration, Instant};

/// Estimates transfer speed from byte counts sampled over wall time.
///
/// A sample is only produced once `min_interval` has elapsed since the
/// previous one, so observers are not flooded with per-chunk events.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    min_interval: Duration,
    last_sample_bytes: u64,
    last_sample_time: Instant,
}

impl ThroughputMeter {
    /// Starts a meter at `start_bytes` (the resume offset).
    #[must_use]
    pub fn new(start_bytes: u64, min_interval: Duration) -> Self {
        Self::starting_at(start_bytes, min_interval, Instant::now())
    }

    fn starting_at(start_bytes: u64, min_interval: Duration, now: Instant) -> Self {
        Self {
            min_interval,
            last_sample_bytes: start_bytes,
            last_sample_time: now,
        }
    }

    /// Records the current byte count and returns bytes/second when due.
    pub fn record(&mut self, bytes_written: u64) -> Option<u64> {
        self.record_at(bytes_written, Instant::now())
    }

    fn record_at(&mut self, bytes_written: u64, now: Instant) -> Option<u64> {
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return None;
        }
        let delta = bytes_written.saturating_sub(self.last_sample_bytes);
        self.last_sample_bytes = bytes_written;
        self.last_sample_time = now;
        Some(bytes_per_second(delta, elapsed))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn bytes_per_second(bytes: u64, elapsed: Duration) -> u64 {
    (bytes as f64 / elapsed.as_secs_f64()).round() as u64
}
