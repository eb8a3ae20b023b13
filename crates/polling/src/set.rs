//! PollerSet - registry of poll loop tasks
//!
//! Owns the shared reading bus and the shutdown flag. The supervisor
//! registers one handle per device, starts them all, consumes the receiver,
//! and finally shuts the set down to collect per-device reports.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use contracts::{DeviceId, Reading};
use device_factory::DeviceHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::config::{PollLoopConfig, PollMetrics};
use crate::poll_loop::{FinalState, PollLoop, PollReport};

/// Registry of per-device poll loops.
pub struct PollerSet {
    tx: Sender<Reading>,
    rx: Option<Receiver<Reading>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    pending: Vec<PollLoop>,
    running: Vec<(DeviceId, JoinHandle<PollReport>)>,
    metrics: Arc<PollMetrics>,
}

impl PollerSet {
    /// Create a set whose reading bus holds `channel_capacity` readings.
    pub fn new(channel_capacity: usize) -> Self {
        let (tx, rx) = bounded(channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            tx,
            rx: Some(rx),
            shutdown_tx,
            shutdown_rx,
            pending: Vec::new(),
            running: Vec::new(),
            metrics: Arc::new(PollMetrics::new()),
        }
    }

    /// Register a device. Must happen before `start_all`.
    pub fn register(&mut self, handle: DeviceHandle, config: PollLoopConfig) {
        let poll_loop = PollLoop::new(
            handle,
            config,
            self.tx.clone(),
            self.shutdown_rx.clone(),
            Arc::clone(&self.metrics),
        );
        debug!(device = %poll_loop.device_id(), "registered poll loop");
        self.pending.push(poll_loop);
    }

    /// Spawn one task per registered device.
    #[instrument(name = "poller_set_start_all", skip(self), fields(devices = self.pending.len()))]
    pub fn start_all(&mut self) {
        info!(devices = self.pending.len(), "starting poll loops");
        for poll_loop in self.pending.drain(..) {
            let device_id = poll_loop.device_id();
            let task = tokio::spawn(poll_loop.run());
            self.running.push((device_id, task));
        }
    }

    /// Signal every loop to stop, join them, and close the bus so the
    /// consumer can drain the remainder and finish.
    #[instrument(name = "poller_set_shutdown", skip(self))]
    pub async fn shutdown(&mut self, join_timeout: Duration) -> Vec<PollReport> {
        let _ = self.shutdown_tx.send(true);

        let mut reports = Vec::with_capacity(self.running.len());
        for (device_id, task) in self.running.drain(..) {
            match tokio::time::timeout(join_timeout, task).await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    error!(device = %device_id, error = ?e, "poll loop task panicked");
                }
                Err(_) => {
                    error!(device = %device_id, "poll loop did not stop in time, aborting");
                    reports.push(PollReport {
                        device_id: device_id.clone(),
                        readings_emitted: 0,
                        read_errors: 0,
                        connect_errors: 0,
                        connects: 0,
                        final_state: FinalState::Stopped,
                        ever_connected: false,
                    });
                }
            }
        }

        // no producers left; unblock the consumer once the bus drains
        self.tx.close();
        info!(devices = reports.len(), "poll loops stopped");
        reports
    }

    /// Get the reading bus receiver
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_receiver(&mut self) -> Option<Receiver<Reading>> {
        self.rx.take()
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<PollMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Registered but not yet started device count
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Running device count
    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}
