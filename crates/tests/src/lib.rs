//! # Integration Tests
//!
//! Cross-crate end-to-end tests, all hardware-free:
//! - ordering guarantees from poll loops through the dispatcher to sinks
//! - malformed-cycle containment
//! - sink outage buffering and oldest-first shedding
//! - the mixed-cadence two-device acquisition scenario

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
        let _: contracts::DeviceId = "smoke".into();
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use contracts::{
        ConnectionParams, ContractError, DataSink, DeviceDescriptor, DriverKind, Reading,
    };
    use device_factory::{DeviceHandle, MockTransport};
    use dispatcher::{Dispatcher, SinkHandle};
    use polling::{BackoffPolicy, PollLoopConfig, PollerSet};
    use tokio::sync::{mpsc, watch};

    fn descriptor(id: &str, interval_ms: u64, columns: &[&str]) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.into(),
            driver: DriverKind::Mock,
            connection: ConnectionParams::default(),
            poll_interval_ms: interval_ms,
            initial_commands: vec![],
            read_commands: vec!["READ?".into()],
            post_read_commands: vec![],
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            base_topic: format!("sensors/lab/{id}"),
            channel_topics: vec![],
            failure_threshold: None,
        }
    }

    fn fast_loop(interval_ms: u64) -> PollLoopConfig {
        PollLoopConfig {
            interval: Duration::from_millis(interval_ms),
            backoff: BackoffPolicy {
                base: Duration::from_millis(20),
                max: Duration::from_millis(100),
            },
            failure_threshold: 2,
        }
    }

    /// Sink that records every reading; writes block while the gate is shut
    /// (an "unavailable" sink from the dispatcher's point of view).
    struct RecordingSink {
        name: String,
        seen: Arc<Mutex<Vec<Reading>>>,
        gate: watch::Receiver<bool>,
        _gate_tx: Option<watch::Sender<bool>>,
    }

    impl RecordingSink {
        fn open(name: &str) -> (Self, Arc<Mutex<Vec<Reading>>>) {
            let (tx, rx) = watch::channel(true);
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    seen: Arc::clone(&seen),
                    gate: rx,
                    _gate_tx: Some(tx),
                },
                seen,
            )
        }

        fn gated(name: &str) -> (Self, Arc<Mutex<Vec<Reading>>>, watch::Sender<bool>) {
            let (tx, rx) = watch::channel(false);
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    seen: Arc::clone(&seen),
                    gate: rx,
                    _gate_tx: None,
                },
                seen,
                tx,
            )
        }
    }

    impl DataSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, reading: &Reading) -> Result<(), ContractError> {
            let mut gate = self.gate.clone();
            let _ = gate.wait_for(|open| *open).await;
            self.seen.lock().unwrap().push(reading.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    /// Per-device seq numbers must be strictly increasing in arrival order.
    fn assert_per_device_order(readings: &[Reading]) {
        let mut last: HashMap<String, u64> = HashMap::new();
        for reading in readings {
            if let Some(prev) = last.get(reading.device_id.as_str()) {
                assert!(
                    reading.seq > *prev,
                    "device {} went backwards: {} after {}",
                    reading.device_id,
                    reading.seq,
                    prev
                );
            }
            last.insert(reading.device_id.to_string(), reading.seq);
        }
    }

    /// Forward the acquisition bus into the dispatcher input, the way the
    /// supervisor does; ends (dropping the dispatcher input) when the bus
    /// closes.
    fn spawn_forwarder(
        bus_rx: async_channel::Receiver<Reading>,
        dispatch_tx: mpsc::Sender<Reading>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(reading) = bus_rx.recv().await {
                if dispatch_tx.send(reading).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Poll loops -> bus -> dispatcher -> two sinks: every sink sees every
    /// device's readings in production order.
    #[tokio::test]
    async fn test_per_device_order_preserved_to_every_sink() {
        let mut pollers = PollerSet::new(256);
        let a = MockTransport::new("a").with_response("READ?", "1.0");
        let b = MockTransport::new("b").with_response("READ?", "2.0");
        pollers.register(
            DeviceHandle::new(descriptor("a", 5, &["v"]), Box::new(a)),
            fast_loop(5),
        );
        pollers.register(
            DeviceHandle::new(descriptor("b", 8, &["v"]), Box::new(b)),
            fast_loop(8),
        );

        let (sink1, seen1) = RecordingSink::open("sink1");
        let (sink2, seen2) = RecordingSink::open("sink2");
        let handles = vec![SinkHandle::spawn(sink1, 256), SinkHandle::spawn(sink2, 256)];
        let (dispatch_tx, dispatch_rx) = mpsc::channel(256);
        let dispatcher_handle = Dispatcher::with_handles(handles, dispatch_rx).spawn();

        let bus_rx = pollers.take_receiver().unwrap();
        pollers.start_all();
        let forwarder = spawn_forwarder(bus_rx, dispatch_tx);

        tokio::time::sleep(Duration::from_millis(300)).await;
        pollers.shutdown(Duration::from_secs(2)).await;
        forwarder.await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), dispatcher_handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();

        for seen in [seen1, seen2] {
            let readings = seen.lock().unwrap().clone();
            assert!(readings.len() > 10, "only {} readings seen", readings.len());
            assert!(readings.iter().any(|r| r.device_id == "a"));
            assert!(readings.iter().any(|r| r.device_id == "b"));
            assert_per_device_order(&readings);
        }
    }

    /// A device answering with the wrong channel count never contributes a
    /// reading, and does not disturb the healthy device.
    #[tokio::test]
    async fn test_malformed_cycle_never_reaches_sinks() {
        let mut pollers = PollerSet::new(256);
        let healthy = MockTransport::new("good").with_response("READ?", "1.0,2.0");
        // two values where three are expected, every cycle
        let garbled = MockTransport::new("bad").with_response("READ?", "1.0,2.0");
        pollers.register(
            DeviceHandle::new(descriptor("good", 5, &["x", "y"]), Box::new(healthy)),
            fast_loop(5),
        );
        pollers.register(
            DeviceHandle::new(descriptor("bad", 5, &["x", "y", "z"]), Box::new(garbled)),
            fast_loop(5),
        );

        let (sink, seen) = RecordingSink::open("sink");
        let handles = vec![SinkHandle::spawn(sink, 256)];
        let (dispatch_tx, dispatch_rx) = mpsc::channel(256);
        let dispatcher_handle = Dispatcher::with_handles(handles, dispatch_rx).spawn();

        let bus_rx = pollers.take_receiver().unwrap();
        let metrics = pollers.metrics();
        pollers.start_all();
        let forwarder = spawn_forwarder(bus_rx, dispatch_tx);

        tokio::time::sleep(Duration::from_millis(250)).await;
        pollers.shutdown(Duration::from_secs(2)).await;
        forwarder.await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), dispatcher_handle).await;

        let readings = seen.lock().unwrap().clone();
        assert!(!readings.is_empty());
        assert!(
            readings.iter().all(|r| r.device_id == "good"),
            "malformed cycles leaked through"
        );
        assert!(readings.iter().all(|r| r.values.len() == 2));
        assert!(metrics.snapshot().read_errors > 0);
    }

    /// Outage shorter than the queue: every reading survives, in order.
    #[tokio::test]
    async fn test_sink_outage_below_capacity_loses_nothing() {
        let (sink, seen, gate) = RecordingSink::gated("gated");
        let handle = SinkHandle::spawn(sink, 16);

        for seq in 0..10u64 {
            let reading = Reading {
                device_id: "dev".into(),
                seq,
                timestamp: chrono::Utc::now(),
                monotonic: Duration::from_millis(seq),
                values: vec![contracts::Value::Number(seq as f64)],
            };
            handle.try_send(reading);
        }

        // sink comes back; the queued backlog drains in order
        gate.send(true).unwrap();
        handle.shutdown().await;

        let readings = seen.lock().unwrap().clone();
        let seqs: Vec<u64> = readings.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    }

    /// Outage longer than the queue: the oldest readings are the ones shed.
    #[tokio::test]
    async fn test_sink_outage_overflow_sheds_oldest() {
        let (sink, seen, gate) = RecordingSink::gated("gated");
        let handle = SinkHandle::spawn(sink, 4);

        for seq in 0..20u64 {
            let reading = Reading {
                device_id: "dev".into(),
                seq,
                timestamp: chrono::Utc::now(),
                monotonic: Duration::from_millis(seq),
                values: vec![contracts::Value::Number(seq as f64)],
            };
            handle.try_send(reading);
        }
        // give the worker a beat to park on the gate with one in flight
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.metrics().dropped_count() > 0);
        gate.send(true).unwrap();
        handle.shutdown().await;

        let readings = seen.lock().unwrap().clone();
        let seqs: Vec<u64> = readings.iter().map(|r| r.seq).collect();
        // newest survived, survivors stay ordered
        assert_eq!(*seqs.last().unwrap(), 19);
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
        assert!(seqs.len() < 20);
        // the shed entries are the oldest ones: everything kept is newer
        // than everything dropped
        let dropped: Vec<u64> = (0..20).filter(|s| !seqs.contains(s)).collect();
        assert!(!dropped.is_empty());
        let min_kept = *seqs.iter().min().unwrap();
        assert!(dropped.iter().all(|d| *d < min_kept));
    }

    /// Two devices with different cadences and value shapes, collected into
    /// one CSV file: row counts track the 2:1 interval ratio and every row
    /// carries the exact mocked values.
    #[tokio::test]
    async fn test_two_device_mixed_cadence_file_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario_{date}.csv");

        let mut pollers = PollerSet::new(512);
        let a = MockTransport::new("a").with_response("READ?", "1.0,2.0,3.0");
        let b = MockTransport::new("b").with_response("READ?", "9.0,8.0");
        pollers.register(
            DeviceHandle::new(descriptor("a", 40, &["a1", "a2", "a3"]), Box::new(a)),
            fast_loop(40),
        );
        pollers.register(
            DeviceHandle::new(descriptor("b", 80, &["b1", "b2"]), Box::new(b)),
            fast_loop(80),
        );

        let params = HashMap::from([(
            "path".to_string(),
            path.display().to_string(),
        )]);
        let file_sink = dispatcher::FileSink::from_params("file", &params).unwrap();
        let handles = vec![SinkHandle::spawn(file_sink, 512)];
        let (dispatch_tx, dispatch_rx) = mpsc::channel(512);
        let dispatcher_handle = Dispatcher::with_handles(handles, dispatch_rx).spawn();

        let bus_rx = pollers.take_receiver().unwrap();
        pollers.start_all();
        let forwarder = spawn_forwarder(bus_rx, dispatch_tx);

        tokio::time::sleep(Duration::from_millis(800)).await;
        pollers.shutdown(Duration::from_secs(2)).await;
        forwarder.await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), dispatcher_handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();

        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let rendered = dir.path().join(format!("scenario_{date}.csv"));
        let content = std::fs::read_to_string(&rendered).unwrap();
        let rows: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();

        let a_rows: Vec<&&str> = rows.iter().filter(|r| r.contains(",a,")).collect();
        let b_rows: Vec<&&str> = rows.iter().filter(|r| r.contains(",b,")).collect();

        assert!(a_rows.len() >= 8, "a produced only {} rows", a_rows.len());
        assert!(b_rows.len() >= 3, "b produced only {} rows", b_rows.len());
        assert!(
            a_rows.len() > b_rows.len(),
            "faster device must dominate: {} vs {}",
            a_rows.len(),
            b_rows.len()
        );

        for row in a_rows {
            assert!(row.ends_with(",1,2,3"), "bad A row: {row}");
        }
        for row in b_rows {
            assert!(row.ends_with(",9,8"), "bad B row: {row}");
        }
    }

    /// Blueprint -> factory -> poll loop round trip using the config layer.
    #[tokio::test]
    async fn test_blueprint_round_trip_drives_mock_device() {
        let toml = r#"
[[devices]]
id = "bench"
driver = "mock"
poll_interval_ms = 10
read_commands = ["MEAS:TEMP?"]
column_names = ["temperature"]
base_topic = "sensors/lab/bench"

[[sinks]]
name = "log"
sink_type = "log"
"#;
        let blueprint =
            config_loader::ConfigLoader::load_from_str(toml, config_loader::ConfigFormat::Toml)
                .unwrap();
        let handles = device_factory::DeviceFactory::build_all(&blueprint).unwrap();
        assert_eq!(handles.len(), 1);

        let mut pollers = PollerSet::new(64);
        for handle in handles {
            pollers.register(handle, fast_loop(10));
        }
        let bus_rx = pollers.take_receiver().unwrap();
        pollers.start_all();

        let reading = tokio::time::timeout(Duration::from_secs(2), bus_rx.recv())
            .await
            .expect("no reading from blueprint-built device")
            .unwrap();
        assert_eq!(reading.device_id, "bench");
        assert_eq!(reading.values.len(), 1);

        pollers.shutdown(Duration::from_secs(2)).await;
    }
}
