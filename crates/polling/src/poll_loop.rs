//! PollLoop - per-device acquisition state machine
//!
//! Connecting -> Polling -> (success -> Polling | repeated failure ->
//! Backoff -> Connecting), Stopped from anywhere on shutdown. The loop is
//! the sole owner of its device handle, so no locking is needed and no
//! other task can interleave commands on the same connection.

use std::sync::Arc;

use async_channel::{Sender, TrySendError};
use contracts::{DeviceId, Reading};
use device_factory::{DeviceHandle, HandleState};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::backoff::Backoff;
use crate::config::{PollLoopConfig, PollMetrics};

/// Where the loop ended up when it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalState {
    /// Clean shutdown, device disconnected
    Stopped,
    /// The reading bus closed underneath the loop
    BusClosed,
}

/// Summary of one poll loop's lifetime, collected by the supervisor.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub device_id: DeviceId,
    pub readings_emitted: u64,
    pub read_errors: u64,
    pub connect_errors: u64,
    pub connects: u64,
    pub final_state: FinalState,
    /// Whether the device ever reached a successful read
    pub ever_connected: bool,
}

impl PollReport {
    fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            readings_emitted: 0,
            read_errors: 0,
            connect_errors: 0,
            connects: 0,
            final_state: FinalState::Stopped,
            ever_connected: false,
        }
    }
}

enum LoopState {
    Connecting,
    Backoff,
    Polling,
}

enum PollExit {
    Shutdown,
    Degraded,
    BusClosed,
}

/// Acquisition task for one device.
pub struct PollLoop {
    handle: DeviceHandle,
    config: PollLoopConfig,
    backoff: Backoff,
    tx: Sender<Reading>,
    shutdown: watch::Receiver<bool>,
    metrics: Arc<PollMetrics>,
    seq: u64,
}

impl PollLoop {
    pub fn new(
        handle: DeviceHandle,
        config: PollLoopConfig,
        tx: Sender<Reading>,
        shutdown: watch::Receiver<bool>,
        metrics: Arc<PollMetrics>,
    ) -> Self {
        let backoff = Backoff::new(config.backoff);
        Self {
            handle,
            config,
            backoff,
            tx,
            shutdown,
            metrics,
            seq: 0,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.handle.device_id().clone()
    }

    /// Drive the device until shutdown. Always disconnects before returning,
    /// even when cancelled mid-read.
    #[instrument(name = "poll_loop", skip(self), fields(device = %self.handle.device_id()))]
    pub async fn run(mut self) -> PollReport {
        let mut report = PollReport::new(self.handle.device_id().clone());
        let mut shutdown = self.shutdown.clone();
        let mut state = LoopState::Connecting;

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }
            match state {
                LoopState::Connecting => {
                    let connected = tokio::select! {
                        result = self.handle.connect() => Some(result),
                        _ = shutdown.wait_for(|stop| *stop) => None,
                    };
                    match connected {
                        None => break 'outer,
                        Some(Ok(())) => {
                            self.backoff.reset();
                            report.connects += 1;
                            report.ever_connected = true;
                            self.metrics.record_connect();
                            metrics::counter!("lablogger_device_connects").increment(1);
                            state = LoopState::Polling;
                        }
                        Some(Err(e)) => {
                            report.connect_errors += 1;
                            self.metrics.record_connect_error();
                            warn!(device = %report.device_id, error = %e, "connect failed");
                            state = LoopState::Backoff;
                        }
                    }
                }

                LoopState::Backoff => {
                    let delay = self.backoff.next_delay();
                    debug!(
                        device = %report.device_id,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before reconnect"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => state = LoopState::Connecting,
                        _ = shutdown.wait_for(|stop| *stop) => break 'outer,
                    }
                }

                LoopState::Polling => match self.poll_until_degraded(&mut shutdown, &mut report).await {
                    PollExit::Shutdown => break 'outer,
                    PollExit::BusClosed => {
                        report.final_state = FinalState::BusClosed;
                        break 'outer;
                    }
                    PollExit::Degraded => {
                        let _ = self.handle.disconnect().await;
                        state = LoopState::Backoff;
                    }
                },
            }
        }

        if self.handle.state() != HandleState::Disconnected {
            if let Err(e) = self.handle.disconnect().await {
                debug!(device = %report.device_id, error = %e, "disconnect on shutdown failed");
            }
        }
        info!(
            device = %report.device_id,
            readings = report.readings_emitted,
            read_errors = report.read_errors,
            connects = report.connects,
            "poll loop stopped"
        );
        report
    }

    /// Inner cadence loop. Returns when shutdown is requested, the bus
    /// closes, or the consecutive-failure threshold trips. Cycles never
    /// overlap: the next tick is deferred while a cycle is outstanding.
    async fn poll_until_degraded(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        report: &mut PollReport,
    ) -> PollExit {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => return PollExit::Shutdown,
            }

            let cycle = tokio::select! {
                result = self.handle.read_cycle(self.seq) => Some(result),
                _ = shutdown.wait_for(|stop| *stop) => None,
            };
            match cycle {
                None => return PollExit::Shutdown,
                Some(Ok(reading)) => {
                    consecutive_failures = 0;
                    self.seq += 1;
                    if !self.emit(reading, report) {
                        return PollExit::BusClosed;
                    }
                }
                Some(Err(e)) => {
                    consecutive_failures += 1;
                    report.read_errors += 1;
                    self.metrics.record_read_error();
                    metrics::counter!("lablogger_read_errors").increment(1);
                    warn!(
                        device = %report.device_id,
                        error = %e,
                        consecutive = consecutive_failures,
                        "read cycle failed"
                    );
                    if consecutive_failures >= self.config.failure_threshold {
                        warn!(
                            device = %report.device_id,
                            threshold = self.config.failure_threshold,
                            "failure threshold reached, tearing connection down"
                        );
                        return PollExit::Degraded;
                    }
                }
            }
        }
    }

    /// Non-blocking emit: a full bus costs this reading, never the cadence.
    fn emit(&self, reading: Reading, report: &mut PollReport) -> bool {
        match self.tx.try_send(reading) {
            Ok(()) => {
                report.readings_emitted += 1;
                self.metrics.record_emitted();
                metrics::counter!("lablogger_readings_emitted").increment(1);
                true
            }
            Err(TrySendError::Full(reading)) => {
                self.metrics.record_dropped();
                metrics::counter!("lablogger_readings_dropped").increment(1);
                warn!(
                    device = %reading.device_id,
                    seq = reading.seq,
                    "reading bus full, reading dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConnectionParams, DeviceDescriptor, DriverKind};
    use device_factory::MockTransport;
    use std::time::Duration;

    fn descriptor(id: &str, interval_ms: u64) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.into(),
            driver: DriverKind::Mock,
            connection: ConnectionParams::default(),
            poll_interval_ms: interval_ms,
            initial_commands: vec![],
            read_commands: vec!["READ?".into()],
            post_read_commands: vec![],
            column_names: vec!["value".into()],
            base_topic: format!("sensors/{id}"),
            channel_topics: vec![],
            failure_threshold: None,
        }
    }

    fn fast_config() -> PollLoopConfig {
        PollLoopConfig {
            interval: Duration::from_millis(10),
            backoff: crate::BackoffPolicy {
                base: Duration::from_millis(50),
                max: Duration::from_millis(400),
            },
            failure_threshold: 2,
        }
    }

    #[tokio::test]
    async fn test_emits_readings_in_sequence() {
        let transport = MockTransport::new("dev").with_response("READ?", "1.5");
        let handle = DeviceHandle::new(descriptor("dev", 10), Box::new(transport));
        let (tx, rx) = async_channel::bounded(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let metrics = Arc::new(PollMetrics::new());

        let task = tokio::spawn(
            PollLoop::new(handle, fast_config(), tx, stop_rx, metrics).run(),
        );

        let mut seqs = Vec::new();
        for _ in 0..5 {
            let reading = rx.recv().await.unwrap();
            seqs.push(reading.seq);
        }
        stop_tx.send(true).unwrap();
        let report = task.await.unwrap();

        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(report.readings_emitted >= 5);
        assert_eq!(report.final_state, FinalState::Stopped);
    }

    #[tokio::test]
    async fn test_connects_on_third_attempt_with_growing_backoff() {
        let transport = MockTransport::new("dev")
            .failing_connects(2)
            .with_response("READ?", "1.0");
        let journal = transport.journal();
        let handle = DeviceHandle::new(descriptor("dev", 10), Box::new(transport));
        let (tx, rx) = async_channel::bounded(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let metrics = Arc::new(PollMetrics::new());

        let task = tokio::spawn(
            PollLoop::new(handle, fast_config(), tx, stop_rx, metrics).run(),
        );

        // a reading proves the third connect succeeded
        let reading = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no reading before timeout")
            .unwrap();
        assert_eq!(reading.seq, 0);

        stop_tx.send(true).unwrap();
        let report = task.await.unwrap();
        assert_eq!(report.connect_errors, 2);
        assert_eq!(report.connects, 1);

        // the gap between attempts 2 and 3 must exceed the gap between 1 and 2
        let attempts = journal.lock().unwrap().connect_attempts.clone();
        assert_eq!(attempts.len(), 3);
        let gap1 = attempts[1] - attempts[0];
        let gap2 = attempts[2] - attempts[1];
        assert!(gap2 > gap1, "gap2 {gap2:?} should exceed gap1 {gap1:?}");
    }

    #[tokio::test]
    async fn test_failure_threshold_triggers_reconnect() {
        // first cycle fine, then persistent garbage with the wrong cardinality
        let transport = MockTransport::new("dev")
            .with_response_sequence("READ?", &["1.0", "1.0,2.0", "1.0,2.0", "1.0,2.0", "1.0"]);
        let journal = transport.journal();
        let handle = DeviceHandle::new(descriptor("dev", 10), Box::new(transport));
        let (tx, rx) = async_channel::bounded(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let metrics = Arc::new(PollMetrics::new());

        let task = tokio::spawn(
            PollLoop::new(handle, fast_config(), tx, stop_rx, metrics).run(),
        );

        // first good reading, then the loop must survive the bad patch and
        // come back with another good one after reconnecting
        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no reading after reconnect")
            .unwrap();
        assert_eq!(second.seq, 1);

        stop_tx.send(true).unwrap();
        let report = task.await.unwrap();
        assert!(report.read_errors >= 2);
        assert!(report.connects >= 2, "expected a reconnect");
        assert!(journal.lock().unwrap().disconnects >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_mid_read_disconnects() {
        let transport = MockTransport::new("dev")
            .with_response("READ?", "1.0")
            .with_command_delay(Duration::from_secs(10));
        let journal = transport.journal();
        let handle = DeviceHandle::new(descriptor("dev", 10), Box::new(transport));
        let (tx, rx) = async_channel::bounded(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let metrics = Arc::new(PollMetrics::new());

        let task = tokio::spawn(
            PollLoop::new(handle, fast_config(), tx, stop_rx, metrics).run(),
        );

        // give the loop time to get stuck inside the slow command
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert_eq!(report.final_state, FinalState::Stopped);
        assert_eq!(report.readings_emitted, 0);
        assert_eq!(journal.lock().unwrap().disconnects, 1);
        assert!(rx.is_empty());
    }
}
