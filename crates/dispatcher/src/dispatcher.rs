//! Dispatcher - main loop for fan-out to sinks

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{DeviceDescriptor, Reading, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::SinkMetrics;
use crate::sinks::{BrokerSink, FileSink, LogSink};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sink configurations
    pub sinks: Vec<SinkConfig>,

    /// Device descriptors, used to derive broker topics per channel
    pub devices: Vec<DeviceDescriptor>,
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: mpsc::Receiver<Reading>,
}

impl DispatcherBuilder {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatcherConfig, input_rx: mpsc::Receiver<Reading>) -> Self {
        Self { config, input_rx }
    }

    /// Build and start the dispatcher
    #[instrument(name = "dispatcher_builder_build", skip(self))]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let handles = Self::initialize_handles(&self.config).await?;

        Ok(Dispatcher {
            handles,
            input_rx: self.input_rx,
        })
    }

    #[instrument(
        name = "dispatcher_initialize_handles",
        skip(config),
        fields(sink_count = config.sinks.len())
    )]
    async fn initialize_handles(
        config: &DispatcherConfig,
    ) -> Result<Vec<SinkHandle>, DispatcherError> {
        let mut handles = Vec::with_capacity(config.sinks.len());
        for sink_config in &config.sinks {
            handles.push(create_sink_handle(sink_config, &config.devices).await?);
        }
        Ok(handles)
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config, devices),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
async fn create_sink_handle(
    config: &SinkConfig,
    devices: &[DeviceDescriptor],
) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::Broker => {
            let sink = BrokerSink::from_params(&config.name, &config.params, devices)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// The main Dispatcher that fans out readings to sinks
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<Reading>,
}

impl Dispatcher {
    /// Create a dispatcher with custom sink handles (for testing)
    pub fn with_handles(handles: Vec<SinkHandle>, input_rx: mpsc::Receiver<Reading>) -> Self {
        Self { handles, input_rx }
    }

    /// Clone out the per-sink metrics handles, e.g. for a final summary
    /// after the dispatcher task finished.
    pub fn metrics_handles(&self) -> Vec<(String, Arc<SinkMetrics>)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect()
    }

    /// Run the dispatcher main loop
    ///
    /// Consumes readings from input and fans out to all sinks.
    /// Returns when the input channel is closed; sink queues are drained and
    /// flushed before it completes.
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) {
        info!(sinks = self.handles.len(), "dispatcher started");

        let mut reading_count: u64 = 0;

        while let Some(reading) = self.input_rx.recv().await {
            reading_count += 1;
            self.dispatch_reading(&reading);

            if reading_count.is_multiple_of(1000) {
                debug!(readings = reading_count, "dispatcher progress");
            }
        }

        info!(
            readings = reading_count,
            "dispatcher input closed, shutting down"
        );

        Self::shutdown_handles(self.handles).await;

        info!("dispatcher shutdown complete");
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    fn dispatch_reading(&self, reading: &Reading) {
        for handle in &self.handles {
            handle.try_send(reading.clone());
        }
    }

    async fn shutdown_handles(handles: Vec<SinkHandle>) {
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Convenience function to create a dispatcher from sink configs
#[instrument(name = "dispatcher_create", skip(sink_configs, devices, input_rx))]
pub async fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    devices: Vec<DeviceDescriptor>,
    input_rx: mpsc::Receiver<Reading>,
) -> Result<Dispatcher, DispatcherError> {
    if sink_configs.is_empty() {
        warn!("no sinks configured, readings will be discarded");
    }
    let config = DispatcherConfig {
        sinks: sink_configs,
        devices,
    };
    DispatcherBuilder::new(config, input_rx).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::Value;
    use std::collections::HashMap;
    use std::time::Duration;

    fn reading(device: &str, seq: u64) -> Reading {
        Reading {
            device_id: device.into(),
            seq,
            timestamp: Utc::now(),
            monotonic: Duration::from_millis(seq),
            values: vec![Value::Number(seq as f64)],
        }
    }

    #[tokio::test]
    async fn test_dispatcher_fanout() {
        let (input_tx, input_rx) = mpsc::channel(10);

        let sink1 = LogSink::new("sink1");
        let sink2 = LogSink::new("sink2");

        let handles = vec![SinkHandle::spawn(sink1, 10), SinkHandle::spawn(sink2, 10)];
        let dispatcher = Dispatcher::with_handles(handles, input_rx);
        let metrics = dispatcher.metrics_handles();
        let handle = dispatcher.spawn();

        for i in 0..5 {
            input_tx.send(reading("dev", i)).await.unwrap();
        }
        drop(input_tx);
        handle.await.unwrap();

        for (name, sink_metrics) in metrics {
            assert_eq!(sink_metrics.write_count(), 5, "sink {name}");
        }
    }

    #[tokio::test]
    async fn test_create_dispatcher_from_config() {
        let (input_tx, input_rx) = mpsc::channel(10);

        let configs = vec![SinkConfig {
            name: "test_log".to_string(),
            sink_type: SinkType::Log,
            queue_capacity: 50,
            params: HashMap::new(),
        }];

        let dispatcher = create_dispatcher(configs, vec![], input_rx).await.unwrap();
        let handle = dispatcher.spawn();

        input_tx.send(reading("dev", 1)).await.unwrap();
        drop(input_tx);
        handle.await.unwrap();
    }
}
