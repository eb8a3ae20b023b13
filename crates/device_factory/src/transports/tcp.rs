//! Raw TCP SCPI transport
//!
//! Line-framed ASCII over a TCP socket, the usual LXI "raw socket" port
//! (5025). Commands containing `?` are queries and read one LF-terminated
//! response line; anything else is a plain write.

use std::time::Duration;

use async_trait::async_trait;
use contracts::{ContractError, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// SCPI over a raw TCP socket.
pub struct TcpTransport {
    device_id: String,
    host: String,
    port: u16,
    timeout: Duration,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpTransport {
    pub fn new(
        device_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        io_timeout: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port,
            timeout: io_timeout,
            reader: None,
            writer: None,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ContractError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            ContractError::command(&self.device_id, line, "not connected")
        })?;
        let mut framed = line.as_bytes().to_vec();
        framed.push(b'\n');
        timeout(self.timeout, writer.write_all(&framed))
            .await
            .map_err(|_| ContractError::command(&self.device_id, line, "write timeout"))?
            .map_err(|e| ContractError::command(&self.device_id, line, e.to_string()))
    }

    async fn read_line(&mut self, command: &str) -> Result<String, ContractError> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            ContractError::command(&self.device_id, command, "not connected")
        })?;
        let mut line = String::new();
        let read = timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| ContractError::command(&self.device_id, command, "response timeout"))?
            .map_err(|e| ContractError::command(&self.device_id, command, e.to_string()))?;
        if read == 0 {
            return Err(ContractError::command(
                &self.device_id,
                command,
                "connection closed by peer",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "scpi_tcp"
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
        stream
            .set_nodelay(true)
            .map_err(|e| ContractError::connect(&self.device_id, e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);

        debug!(
            device = %self.device_id,
            host = %self.host,
            port = self.port,
            "tcp connection established"
        );
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<Option<String>, ContractError> {
        self.write_line(command).await?;
        if !command.contains('?') {
            return Ok(None);
        }
        let response = self.read_line(command).await?;
        trace!(device = %self.device_id, command, response = %response, "query");
        Ok(Some(response))
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            // best effort; the peer may already be gone
            let _ = writer.shutdown().await;
            debug!(device = %self.device_id, "tcp connection closed");
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

    async fn spawn_fake_instrument() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let cmd = String::from_utf8_lossy(&buf[..n]);
                // answer queries only, like a real SCPI box
                for line in cmd.lines() {
                    if line.contains('?') {
                        socket.write_all(b"+1.250000E+00\n").await.unwrap();
                    }
                }
            }
        });
        (addr, task)
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let (addr, _server) = spawn_fake_instrument().await;
        let mut transport = TcpTransport::new(
            "dmm0",
            addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(1),
        );

        transport.connect().await.unwrap();
        let response = transport.send_command("READ?").await.unwrap();
        assert_eq!(response.as_deref(), Some("+1.250000E+00"));

        // plain write yields no response
        let response = transport.send_command("*RST").await.unwrap();
        assert_eq!(response, None);

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_connect_error() {
        // port 1 is virtually never listening
        let mut transport =
            TcpTransport::new("dmm0", "127.0.0.1", 1, Duration::from_millis(250));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, ContractError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut transport =
            TcpTransport::new("dmm0", "127.0.0.1", 1, Duration::from_millis(250));
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
    }
}
