//! Pipeline run statistics.

use std::time::Duration;

use dispatcher::MetricsSnapshot;
use observability::AcquisitionSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Readings forwarded to the dispatcher
    pub readings_forwarded: u64,

    /// Readings lost on the acquisition bus (backpressure)
    pub readings_dropped: u64,

    /// Failed read cycles across all devices
    pub read_errors: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Number of configured devices
    pub active_devices: usize,

    /// Number of configured sinks
    pub active_sinks: usize,

    /// Devices that never reached a successful read
    pub dead_devices: Vec<String>,

    /// Per-device acquisition summary
    pub acquisition: AcquisitionSummary,

    /// Final per-sink metrics snapshots
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

impl RunStats {
    /// Readings per second over the whole run
    pub fn rps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.readings_forwarded as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Run Statistics                           ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Readings forwarded: {}", self.readings_forwarded);
        println!("   ├─ Readings/s: {:.2}", self.rps());
        println!("   ├─ Read errors: {}", self.read_errors);
        println!("   ├─ Bus drops: {}", self.readings_dropped);
        println!("   ├─ Devices: {}", self.active_devices);
        println!("   └─ Sinks: {}", self.active_sinks);

        if !self.acquisition.devices.is_empty() {
            println!("\n📈 Devices");
            for (device, summary) in &self.acquisition.devices {
                println!(
                    "   ├─ {}: {} readings, {} errors, {} connects, cadence {}",
                    device,
                    summary.readings,
                    summary.read_errors,
                    summary.connects,
                    summary.cadence_ms
                );
            }
        }

        if !self.sinks.is_empty() {
            println!("\n📤 Sinks");
            for (name, snapshot) in &self.sinks {
                println!(
                    "   ├─ {}: {} written, {} failed, {} dropped",
                    name, snapshot.write_count, snapshot.failure_count, snapshot.dropped_count
                );
            }
        }

        if !self.dead_devices.is_empty() {
            println!("\n⚠️  Devices that never delivered a reading");
            for device in &self.dead_devices {
                println!("   ├─ {device}");
            }
        }

        println!();
    }
}
