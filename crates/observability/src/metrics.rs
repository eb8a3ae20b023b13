//! Acquisition metrics collection
//!
//! Prometheus counters/gauges for the live pipeline plus an in-memory
//! aggregator used for the end-of-run summary.

use std::collections::HashMap;

use metrics::{counter, gauge, histogram};

/// Record a reading forwarded to the dispatcher
pub fn record_reading_forwarded(device_id: &str) {
    counter!(
        "lablogger_readings_forwarded_total",
        "device" => device_id.to_string()
    )
    .increment(1);
}

/// Record a reading lost to backpressure
pub fn record_reading_dropped(sink: &str) {
    counter!(
        "lablogger_readings_dropped_total",
        "sink" => sink.to_string()
    )
    .increment(1);
}

/// Record a sink write attempt
pub fn record_sink_write(sink: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "lablogger_sink_writes_total",
        "sink" => sink.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the current depth of the shared reading bus
pub fn record_bus_depth(depth: usize) {
    gauge!("lablogger_reading_bus_depth").set(depth as f64);
}

/// Running statistics without storing samples (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        }
    }
}

/// Compact rendering of a RunningStats
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            mean: stats.mean,
            stddev: stats.stddev(),
            min: stats.min,
            max: stats.max,
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "n=0");
        }
        write!(
            f,
            "n={} mean={:.2} sd={:.2} min={:.2} max={:.2}",
            self.count, self.mean, self.stddev, self.min, self.max
        )
    }
}

/// Per-device tallies for the run summary
#[derive(Debug, Clone, Default)]
pub struct DeviceTally {
    pub readings: u64,
    pub read_errors: u64,
    pub connects: u64,
    /// Gap between consecutive readings (milliseconds)
    pub cadence_ms: RunningStats,
    last_monotonic_ms: Option<f64>,
}

/// Aggregates per-device acquisition statistics in memory.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionAggregator {
    pub total_forwarded: u64,
    devices: HashMap<String, DeviceTally>,
}

impl AcquisitionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per forwarded reading.
    pub fn record_reading(&mut self, device_id: &str, monotonic_ms: f64) {
        self.total_forwarded += 1;
        let tally = self.devices.entry(device_id.to_string()).or_default();
        tally.readings += 1;
        if let Some(last) = tally.last_monotonic_ms {
            tally.cadence_ms.push(monotonic_ms - last);
            histogram!(
                "lablogger_reading_gap_ms",
                "device" => device_id.to_string()
            )
            .record(monotonic_ms - last);
        }
        tally.last_monotonic_ms = Some(monotonic_ms);
    }

    /// Fold a finished poll loop's error/connect counts in.
    pub fn record_device_totals(&mut self, device_id: &str, read_errors: u64, connects: u64) {
        let tally = self.devices.entry(device_id.to_string()).or_default();
        tally.read_errors = read_errors;
        tally.connects = connects;
    }

    /// Generate the run summary.
    pub fn summary(&self) -> AcquisitionSummary {
        let mut devices: Vec<(String, DeviceSummary)> = self
            .devices
            .iter()
            .map(|(id, tally)| {
                (
                    id.clone(),
                    DeviceSummary {
                        readings: tally.readings,
                        read_errors: tally.read_errors,
                        connects: tally.connects,
                        cadence_ms: StatsSummary::from(&tally.cadence_ms),
                    },
                )
            })
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));

        AcquisitionSummary {
            total_forwarded: self.total_forwarded,
            devices,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-device summary line
#[derive(Debug, Clone, Copy)]
pub struct DeviceSummary {
    pub readings: u64,
    pub read_errors: u64,
    pub connects: u64,
    pub cadence_ms: StatsSummary,
}

/// Run summary over all devices
#[derive(Debug, Clone)]
pub struct AcquisitionSummary {
    pub total_forwarded: u64,
    pub devices: Vec<(String, DeviceSummary)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for sample in [10.0, 12.0, 8.0, 10.0] {
            stats.push(sample);
        }
        let summary = StatsSummary::from(&stats);
        assert_eq!(summary.count, 4);
        assert!((summary.mean - 10.0).abs() < 1e-9);
        assert_eq!(summary.min, 8.0);
        assert_eq!(summary.max, 12.0);
    }

    #[test]
    fn test_aggregator_tracks_cadence_per_device() {
        let mut agg = AcquisitionAggregator::new();
        agg.record_reading("a", 0.0);
        agg.record_reading("a", 100.0);
        agg.record_reading("a", 200.0);
        agg.record_reading("b", 50.0);
        agg.record_device_totals("a", 2, 1);

        let summary = agg.summary();
        assert_eq!(summary.total_forwarded, 4);
        assert_eq!(summary.devices.len(), 2);

        let (id, a) = &summary.devices[0];
        assert_eq!(id, "a");
        assert_eq!(a.readings, 3);
        assert_eq!(a.read_errors, 2);
        assert!((a.cadence_ms.mean - 100.0).abs() < 1e-9);
    }
}
