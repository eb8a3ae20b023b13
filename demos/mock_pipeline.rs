//! Mock Pipeline Demo
//!
//! Drives two simulated instruments through the full acquisition path
//! (poll loops -> reading bus -> dispatcher -> log sink) without any
//! hardware.
//!
//! Run with: cargo run --bin mock_pipeline

use std::time::Duration;

use contracts::{ConnectionParams, DeviceDescriptor, DriverKind};
use device_factory::DeviceFactory;
use dispatcher::{Dispatcher, LogSink, SinkHandle};
use polling::{PollLoopConfig, PollerSet};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting mock pipeline demo");

    // Two simulated bench instruments on different cadences
    let devices = vec![
        mock_device("thermometer", 500, &["temperature"]),
        mock_device("hygrometer", 1000, &["humidity"]),
    ];

    let mut pollers = PollerSet::new(100);
    for descriptor in &devices {
        let handle = DeviceFactory::build_handle(descriptor)?;
        pollers.register(
            handle,
            PollLoopConfig {
                interval: descriptor.poll_interval(),
                ..PollLoopConfig::default()
            },
        );
    }

    let handles = vec![SinkHandle::spawn(LogSink::new("console"), 100)];
    let (dispatch_tx, dispatch_rx) = mpsc::channel(100);
    let dispatcher_handle = Dispatcher::with_handles(handles, dispatch_rx).spawn();

    let bus_rx = pollers.take_receiver().ok_or("bus receiver taken")?;
    pollers.start_all();
    tracing::info!("Polling for 10 seconds...");

    let forwarder = tokio::spawn(async move {
        let mut forwarded = 0u64;
        while let Ok(reading) = bus_rx.recv().await {
            forwarded += 1;
            if dispatch_tx.send(reading).await.is_err() {
                break;
            }
        }
        forwarded
    });

    tokio::time::sleep(Duration::from_secs(10)).await;

    let reports = pollers.shutdown(Duration::from_secs(5)).await;
    let forwarded = forwarder.await?;
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;

    for report in reports {
        tracing::info!(
            device = %report.device_id,
            readings = report.readings_emitted,
            "device finished"
        );
    }
    tracing::info!(forwarded, "mock pipeline demo complete");
    Ok(())
}

fn mock_device(id: &str, interval_ms: u64, columns: &[&str]) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.to_string(),
        driver: DriverKind::Mock,
        connection: ConnectionParams::default(),
        poll_interval_ms: interval_ms,
        initial_commands: vec!["*RST".into()],
        read_commands: columns.iter().map(|c| format!("MEAS:{}?", c.to_uppercase())).collect(),
        post_read_commands: vec![],
        column_names: columns.iter().map(|c| c.to_string()).collect(),
        base_topic: format!("sensors/demo/{id}"),
        channel_topics: vec![],
        failure_threshold: None,
    }
}
