//! LogSink - logs reading summary via tracing

use contracts::{ContractError, DataSink, Reading};
use tracing::{info, instrument};

/// Sink that logs reading summaries for debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_reading(&self, reading: &Reading) {
        let rendered: Vec<String> = reading.values.iter().map(|v| v.to_string()).collect();
        info!(
            sink = %self.name,
            device = %reading.device_id,
            seq = reading.seq,
            timestamp = %reading.timestamp.to_rfc3339(),
            values = %rendered.join(","),
            "reading"
        );
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, reading),
        fields(sink = %self.name, device = %reading.device_id)
    )]
    async fn write(&mut self, reading: &Reading) -> Result<(), ContractError> {
        self.log_reading(reading);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing buffered
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "log sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let reading = Reading {
            device_id: "dev".into(),
            seq: 1,
            timestamp: Utc::now(),
            monotonic: Duration::from_secs(1),
            values: vec![Value::Number(1.0), Value::Text("AUTO".into())],
        };

        assert!(sink.write(&reading).await.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
