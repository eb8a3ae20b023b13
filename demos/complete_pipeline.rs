//! Complete Pipeline Demo
//!
//! Loads a blueprint (from the path given as the first argument, or a
//! built-in two-device mock configuration) and runs the full pipeline with
//! a CSV file sink next to the log sink.
//!
//! Run with: cargo run --bin complete_pipeline [config.toml]

use std::collections::HashMap;
use std::time::Duration;

use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{LoggerBlueprint, SinkConfig, SinkType};
use device_factory::DeviceFactory;
use polling::{BackoffPolicy, PollLoopConfig, PollerSet};
use tokio::sync::mpsc;

const BUILTIN_CONFIG: &str = r#"
[[devices]]
id = "thermometer"
driver = "mock"
poll_interval_ms = 500
initial_commands = ["*RST"]
read_commands = ["MEAS:TEMP?"]
column_names = ["temperature"]
base_topic = "sensors/demo/thermometer"
channel_topics = ["temperature"]

[[devices]]
id = "power_meter"
driver = "mock"
poll_interval_ms = 1000
read_commands = ["MEAS:POW?"]
column_names = ["power"]
base_topic = "sensors/demo/power_meter"

[[sinks]]
name = "console"
sink_type = "log"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut blueprint = load_blueprint()?;

    // always add a CSV file next to whatever the config routes to
    blueprint.sinks.push(SinkConfig {
        name: "demo_file".into(),
        sink_type: SinkType::File,
        queue_capacity: 100,
        params: HashMap::from([("path".to_string(), "demo_{date}.csv".to_string())]),
    });

    tracing::info!(
        devices = blueprint.devices.len(),
        sinks = blueprint.sinks.len(),
        "blueprint loaded"
    );

    let handles = DeviceFactory::build_all(&blueprint)?;

    let (dispatch_tx, dispatch_rx) = mpsc::channel(100);
    let dispatcher = dispatcher::create_dispatcher(
        blueprint.sinks.clone(),
        blueprint.devices.clone(),
        dispatch_rx,
    )
    .await?;
    let dispatcher_handle = dispatcher.spawn();

    let mut pollers = PollerSet::new(100);
    for handle in handles {
        let config = {
            let descriptor = handle.descriptor();
            PollLoopConfig {
                interval: descriptor.poll_interval(),
                backoff: BackoffPolicy::default(),
                failure_threshold: blueprint.failure_threshold(descriptor),
            }
        };
        pollers.register(handle, config);
    }
    let bus_rx = pollers.take_receiver().ok_or("bus receiver taken")?;
    pollers.start_all();

    let forwarder = tokio::spawn(async move {
        while let Ok(reading) = bus_rx.recv().await {
            if dispatch_tx.send(reading).await.is_err() {
                break;
            }
        }
    });

    tracing::info!("Running for 15 seconds, writing demo_<date>.csv ...");
    tokio::time::sleep(Duration::from_secs(15)).await;

    pollers.shutdown(Duration::from_secs(5)).await;
    forwarder.await?;
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;

    tracing::info!("complete pipeline demo finished");
    Ok(())
}

fn load_blueprint() -> Result<LoggerBlueprint, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "loading blueprint");
            Ok(ConfigLoader::load_from_path(std::path::Path::new(&path))?)
        }
        None => Ok(ConfigLoader::load_from_str(
            BUILTIN_CONFIG,
            ConfigFormat::Toml,
        )?),
    }
}
