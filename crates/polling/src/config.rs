//! Poll loop configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Per-device poll loop configuration
#[derive(Debug, Clone, Copy)]
pub struct PollLoopConfig {
    /// Read cadence
    pub interval: Duration,

    /// Reconnect backoff tuning
    pub backoff: BackoffPolicy,

    /// Consecutive read failures before the connection is torn down
    pub failure_threshold: u32,
}

impl Default for PollLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
            failure_threshold: 3,
        }
    }
}

/// Shared acquisition metrics, updated by every poll loop
#[derive(Debug, Default)]
pub struct PollMetrics {
    /// Readings put on the bus
    pub readings_emitted: AtomicU64,

    /// Readings dropped because the bus was full
    pub readings_dropped: AtomicU64,

    /// Failed read cycles (command error, timeout, malformed data)
    pub read_errors: AtomicU64,

    /// Failed connect attempts
    pub connect_errors: AtomicU64,

    /// Successful (re)connects
    pub connects: AtomicU64,
}

impl PollMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_emitted(&self) {
        self.readings_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.readings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_error(&self) {
        self.connect_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_emitted: self.readings_emitted.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            connect_errors: self.connect_errors.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub readings_emitted: u64,
    pub readings_dropped: u64,
    pub read_errors: u64,
    pub connect_errors: u64,
    pub connects: u64,
}
