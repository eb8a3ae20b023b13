//! Pipeline orchestrator - the supervisor of the whole run.
//!
//! Owns the authoritative set of poll loops and sink workers. Startup order:
//! device handles are constructed first (any failure there is fatal before a
//! single task runs), then the dispatcher with its sinks, then the poll
//! loops. Shutdown is the reverse: poll loops stop first so no new readings
//! are produced, the bus is drained, and the dispatcher gets a bounded
//! window to flush its sink queues.

use std::time::Duration;

use anyhow::{Context, Result};
use contracts::LoggerBlueprint;
use device_factory::DeviceFactory;
use observability::AcquisitionAggregator;
use polling::{BackoffPolicy, PollLoopConfig, PollerSet};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use super::RunStats;

/// How long poll loops / the dispatcher get to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The acquisition blueprint
    pub blueprint: LoggerBlueprint,

    /// Maximum number of readings to forward (None = unlimited)
    pub max_readings: Option<u64>,

    /// Wall-clock bound for the run (None = until interrupted)
    pub duration: Option<Duration>,

    /// Internal channel buffer size
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline until the shutdown flag flips, a bound is reached,
    /// or every producer is gone.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<RunStats> {
        let started = Instant::now();
        let blueprint = &self.config.blueprint;

        // Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("metrics endpoint available on port {port}");
        }

        // Construct every device handle up front; a bad descriptor must
        // fail the run before any task starts.
        info!(devices = blueprint.devices.len(), "constructing device handles");
        let handles =
            DeviceFactory::build_all(blueprint).context("failed to construct device handles")?;

        // Dispatcher + sinks
        info!(sinks = blueprint.sinks.len(), "setting up dispatcher");
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.config.buffer_size);
        let dispatcher = dispatcher::create_dispatcher(
            blueprint.sinks.clone(),
            blueprint.devices.clone(),
            dispatch_rx,
        )
        .await
        .context("failed to create dispatcher")?;
        let sink_metrics = dispatcher.metrics_handles();
        let active_sinks = blueprint.sinks.len();
        let dispatcher_handle = dispatcher.spawn();

        // Poll loops
        let mut pollers = PollerSet::new(self.config.buffer_size);
        for handle in handles {
            let loop_config = {
                let descriptor = handle.descriptor();
                PollLoopConfig {
                    interval: descriptor.poll_interval(),
                    backoff: BackoffPolicy {
                        base: Duration::from_millis(blueprint.poll.backoff_base_ms),
                        max: Duration::from_millis(blueprint.poll.backoff_max_ms),
                    },
                    failure_threshold: blueprint.failure_threshold(descriptor),
                }
            };
            pollers.register(handle, loop_config);
        }
        let bus_rx = pollers
            .take_receiver()
            .context("reading bus receiver already taken")?;
        let poll_metrics = pollers.metrics();
        let active_devices = blueprint.devices.len();
        pollers.start_all();

        info!(
            devices = active_devices,
            sinks = active_sinks,
            max_readings = ?self.config.max_readings,
            duration = ?self.config.duration,
            "pipeline running"
        );

        // Forward readings from the bus to the dispatcher until a stop
        // condition fires.
        let mut aggregator = AcquisitionAggregator::new();
        let mut forwarded: u64 = 0;
        let mut shutdown = shutdown.clone();
        let deadline = self.config.duration.map(|d| started + d);

        loop {
            let next = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("shutdown requested");
                    None
                }
                _ = deadline_reached(deadline) => {
                    info!("configured duration elapsed");
                    None
                }
                received = bus_rx.recv() => match received {
                    Ok(reading) => Some(reading),
                    Err(_) => {
                        warn!("reading bus closed, no producers left");
                        None
                    }
                },
            };

            let Some(reading) = next else { break };

            forwarded += 1;
            aggregator.record_reading(
                reading.device_id.as_str(),
                reading.monotonic.as_secs_f64() * 1000.0,
            );
            observability::record_reading_forwarded(reading.device_id.as_str());
            observability::record_bus_depth(bus_rx.len());

            if dispatch_tx.send(reading).await.is_err() {
                warn!("dispatcher channel closed");
                break;
            }

            if let Some(max) = self.config.max_readings {
                if forwarded >= max {
                    info!(readings = forwarded, "reached max readings limit");
                    break;
                }
            }
        }

        // Ordered shutdown: stop producers, drain the bus, then let the
        // dispatcher flush its sinks.
        info!("stopping poll loops");
        let reports = pollers.shutdown(SHUTDOWN_GRACE).await;

        while let Ok(reading) = bus_rx.try_recv() {
            forwarded += 1;
            aggregator.record_reading(
                reading.device_id.as_str(),
                reading.monotonic.as_secs_f64() * 1000.0,
            );
            if dispatch_tx.send(reading).await.is_err() {
                break;
            }
        }

        drop(dispatch_tx);
        if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher_handle)
            .await
            .is_err()
        {
            warn!("dispatcher did not flush within the grace period");
        }

        // Fold the per-device reports into the summary. A device that never
        // produced anything is reported, not fatal - the rest of the run
        // was healthy.
        let mut read_errors = 0;
        let mut dead_devices = Vec::new();
        for report in &reports {
            read_errors += report.read_errors;
            aggregator.record_device_totals(
                report.device_id.as_str(),
                report.read_errors,
                report.connects,
            );
            if !report.ever_connected {
                warn!(device = %report.device_id, "device never reached a successful read");
                dead_devices.push(report.device_id.to_string());
            }
        }

        let poll_snapshot = poll_metrics.snapshot();
        let stats = RunStats {
            readings_forwarded: forwarded,
            readings_dropped: poll_snapshot.readings_dropped,
            read_errors,
            duration: started.elapsed(),
            active_devices,
            active_sinks,
            dead_devices,
            acquisition: aggregator.summary(),
            sinks: sink_metrics
                .iter()
                .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
                .collect(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            readings = stats.readings_forwarded,
            rps = format!("{:.2}", stats.rps()),
            "pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Resolves when the optional deadline passes; pends forever without one.
async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
