//! Serial line transport
//!
//! SCPI-ish line framing over a local tty, for bench instruments that only
//! expose RS-232/USB-serial. Only compiled with the `serial` feature.

use std::time::Duration;

use async_trait::async_trait;
use contracts::{ContractError, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

/// Instrument on a local serial line.
pub struct SerialTransport {
    device_id: String,
    tty: String,
    baud_rate: u32,
    timeout: Duration,
    reader: Option<BufReader<ReadHalf<SerialStream>>>,
    writer: Option<WriteHalf<SerialStream>>,
}

impl SerialTransport {
    pub fn new(
        device_id: impl Into<String>,
        tty: impl Into<String>,
        baud_rate: u32,
        io_timeout: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            tty: tty.into(),
            baud_rate,
            timeout: io_timeout,
            reader: None,
            writer: None,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ContractError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ContractError::command(&self.device_id, line, "not connected"))?;
        let mut framed = line.as_bytes().to_vec();
        framed.push(b'\n');
        timeout(self.timeout, writer.write_all(&framed))
            .await
            .map_err(|_| ContractError::command(&self.device_id, line, "write timeout"))?
            .map_err(|e| ContractError::command(&self.device_id, line, e.to_string()))
    }

    async fn read_line(&mut self, command: &str) -> Result<String, ContractError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ContractError::command(&self.device_id, command, "not connected"))?;
        let mut line = String::new();
        timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| ContractError::command(&self.device_id, command, "response timeout"))?
            .map_err(|e| ContractError::command(&self.device_id, command, e.to_string()))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> &'static str {
        "scpi_serial"
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        if self.is_connected() {
            return Ok(());
        }
        let stream = tokio_serial::new(&self.tty, self.baud_rate)
            .open_native_async()
            .map_err(|e| ContractError::connect(&self.device_id, e.to_string()))?;

        let (read_half, write_half) = tokio::io::split(stream);
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);

        debug!(
            device = %self.device_id,
            tty = %self.tty,
            baud = self.baud_rate,
            "serial connection opened"
        );
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<Option<String>, ContractError> {
        self.write_line(command).await?;
        if !command.contains('?') {
            return Ok(None);
        }
        let response = self.read_line(command).await?;
        trace!(device = %self.device_id, command, response = %response, "serial query");
        Ok(Some(response))
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
            debug!(device = %self.device_id, "serial connection closed");
        }
        self.reader = None;
        Ok(())
    }
}
