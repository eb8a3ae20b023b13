//! Prologix GPIB-over-ethernet transport
//!
//! Talks to a Prologix-style GPIB adapter on its TCP control port. The
//! adapter is switched to controller mode with read-after-write enabled, and
//! addressed to the instrument's primary address once at connect time;
//! instrument traffic then uses the same line framing as the raw TCP
//! transport. Lines starting with `++` are adapter commands and get no
//! instrument response.

use std::time::Duration;

use async_trait::async_trait;
use contracts::{ContractError, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// GPIB instrument behind a Prologix ethernet adapter.
pub struct PrologixTransport {
    device_id: String,
    host: String,
    port: u16,
    gpib_address: u8,
    timeout: Duration,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl PrologixTransport {
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        gpib_address: u8,
        io_timeout: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port,
            gpib_address,
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
        let read = timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| ContractError::command(&self.device_id, command, "response timeout"))?
            .map_err(|e| ContractError::command(&self.device_id, command, e.to_string()))?;
        if read == 0 {
            return Err(ContractError::command(
                &self.device_id,
                command,
                "adapter closed the connection",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Controller mode, auto read-after-write, instrument address.
    async fn configure_adapter(&mut self) -> Result<(), ContractError> {
        let setup = [
            "++mode 1".to_string(),
            "++auto 1".to_string(),
            format!("++addr {}", self.gpib_address),
        ];
        for line in &setup {
            self.write_line(line).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for PrologixTransport {
    fn kind(&self) -> &'static str {
        "prologix"
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        if self.is_connected() {
            return Ok(());
        }
        let addr = (self.host.clone(), self.port);
        let stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ContractError::connect(&self.device_id, "connect timeout"))?
            .map_err(|e| ContractError::connect(&self.device_id, e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);

        if let Err(e) = self.configure_adapter().await {
            let _ = self.disconnect().await;
            return Err(ContractError::connect(&self.device_id, e.to_string()));
        }

        debug!(
            device = %self.device_id,
            host = %self.host,
            port = self.port,
            gpib = self.gpib_address,
            "prologix adapter configured"
        );
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<Option<String>, ContractError> {
        self.write_line(command).await?;
        // adapter-directed lines and plain writes get no response
        if command.starts_with("++") || !command.contains('?') {
            return Ok(None);
        }
        let response = self.read_line(command).await?;
        trace!(device = %self.device_id, command, response = %response, "gpib query");
        Ok(Some(response))
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
            debug!(device = %self.device_id, "prologix connection closed");
        }
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_adapter_setup_sent_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut collected = String::new();
            let mut buf = vec![0u8; 256];
            while collected.lines().count() < 3 {
                let n = socket.read(&mut buf).await.unwrap();
                collected.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
            collected
        });

        let mut transport = PrologixTransport::new(
            "k2002",
            addr.ip().to_string(),
            addr.port(),
            16,
            Duration::from_secs(1),
        );
        transport.connect().await.unwrap();

        let seen = server.await.unwrap();
        let lines: Vec<&str> = seen.lines().collect();
        assert_eq!(lines, vec!["++mode 1", "++auto 1", "++addr 16"]);
    }
}
