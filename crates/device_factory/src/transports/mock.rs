//! Mock transport
//!
//! Scriptable stand-in for a real instrument. Used by tests (scripted
//! responses, connect failures, slow commands) and by the `mock` driver kind
//! in hardware-free demo runs (synthesized measurement values).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use contracts::{ContractError, Transport};
use tracing::trace;

/// Everything the mock observed, for assertions.
#[derive(Debug, Default)]
pub struct MockJournal {
    /// One entry per connect attempt, successful or not
    pub connect_attempts: Vec<Instant>,
    /// Commands in the order they were attempted
    pub commands: Vec<String>,
    /// Completed disconnects (connected -> disconnected transitions)
    pub disconnects: u32,
}

/// Scriptable mock transport.
pub struct MockTransport {
    device_id: String,
    connected: bool,
    remaining_connect_failures: u32,
    responses: HashMap<String, Script>,
    failing_commands: HashSet<String>,
    command_delay: Duration,
    synthesize: bool,
    counter: u64,
    journal: Arc<Mutex<MockJournal>>,
}

struct Script {
    queue: Vec<String>,
    next: usize,
}

impl Script {
    fn fixed(response: &str) -> Self {
        Self {
            queue: vec![response.to_string()],
            next: 0,
        }
    }

    /// Returns the next scripted response; the last entry repeats forever.
    fn take(&mut self) -> String {
        let idx = self.next.min(self.queue.len() - 1);
        self.next += 1;
        self.queue[idx].clone()
    }
}

impl MockTransport {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            connected: false,
            remaining_connect_failures: 0,
            responses: HashMap::new(),
            failing_commands: HashSet::new(),
            command_delay: Duration::ZERO,
            synthesize: false,
            counter: 0,
            journal: Arc::new(Mutex::new(MockJournal::default())),
        }
    }

    /// A mock that answers any query with a slowly drifting number; this is
    /// what the factory builds for the `mock` driver kind.
    pub fn synthetic(device_id: impl Into<String>) -> Self {
        let mut mock = Self::new(device_id);
        mock.synthesize = true;
        mock
    }

    /// Always answer `command` with `response`.
    pub fn with_response(mut self, command: &str, response: &str) -> Self {
        self.responses
            .insert(command.to_string(), Script::fixed(response));
        self
    }

    /// Answer `command` with the given responses in order; the last one
    /// repeats once the script runs out.
    pub fn with_response_sequence(mut self, command: &str, responses: &[&str]) -> Self {
        self.responses.insert(
            command.to_string(),
            Script {
                queue: responses.iter().map(|r| r.to_string()).collect(),
                next: 0,
            },
        );
        self
    }

    /// Fail the first `n` connect attempts before succeeding.
    pub fn failing_connects(mut self, n: u32) -> Self {
        self.remaining_connect_failures = n;
        self
    }

    /// Make `command` always fail.
    pub fn failing_command(mut self, command: &str) -> Self {
        self.failing_commands.insert(command.to_string());
        self
    }

    /// Delay every command by `delay` (to exercise cancellation and slow
    /// buses).
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Shared journal handle for assertions after the transport was moved
    /// into a handle.
    pub fn journal(&self) -> Arc<Mutex<MockJournal>> {
        Arc::clone(&self.journal)
    }

    fn synthesized_value(&mut self) -> String {
        // sawtooth around a plausible lab temperature
        let value = 20.0 + (self.counter % 600) as f64 * 0.01;
        self.counter += 1;
        format!("{value:.4}")
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        self.journal
            .lock()
            .unwrap()
            .connect_attempts
            .push(Instant::now());

        if self.remaining_connect_failures > 0 {
            self.remaining_connect_failures -= 1;
            return Err(ContractError::connect(
                &self.device_id,
                "scripted connect failure",
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<Option<String>, ContractError> {
        if !self.connected {
            return Err(ContractError::command(
                &self.device_id,
                command,
                "not connected",
            ));
        }

        self.journal
            .lock()
            .unwrap()
            .commands
            .push(command.to_string());

        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }

        if self.failing_commands.contains(command) {
            return Err(ContractError::command(
                &self.device_id,
                command,
                "scripted command failure",
            ));
        }

        if !command.contains('?') {
            return Ok(None);
        }

        if let Some(script) = self.responses.get_mut(command) {
            let response = script.take();
            trace!(device = %self.device_id, command, response = %response, "mock query");
            return Ok(Some(response));
        }
        if self.synthesize {
            return Ok(Some(self.synthesized_value()));
        }
        Err(ContractError::command(
            &self.device_id,
            command,
            "no scripted response",
        ))
    }

    async fn disconnect(&mut self) -> Result<(), ContractError> {
        if self.connected {
            self.connected = false;
            self.journal.lock().unwrap().disconnects += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let mut mock = MockTransport::new("dev").failing_connects(2);
        assert!(mock.connect().await.is_err());
        assert!(mock.connect().await.is_err());
        assert!(mock.connect().await.is_ok());
        assert_eq!(mock.journal().lock().unwrap().connect_attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_response_sequence_repeats_last() {
        let mut mock = MockTransport::new("dev").with_response_sequence("READ?", &["1.0", "2.0"]);
        mock.connect().await.unwrap();
        assert_eq!(mock.send_command("READ?").await.unwrap().unwrap(), "1.0");
        assert_eq!(mock.send_command("READ?").await.unwrap().unwrap(), "2.0");
        assert_eq!(mock.send_command("READ?").await.unwrap().unwrap(), "2.0");
    }

    #[tokio::test]
    async fn test_writes_return_no_response() {
        let mut mock = MockTransport::new("dev");
        mock.connect().await.unwrap();
        assert_eq!(mock.send_command("*RST").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let mut mock = MockTransport::new("dev");
        assert!(mock.send_command("READ?").await.is_err());
    }

    #[tokio::test]
    async fn test_synthetic_answers_any_query() {
        let mut mock = MockTransport::synthetic("dev");
        mock.connect().await.unwrap();
        let first = mock.send_command("MEAS:TEMP?").await.unwrap().unwrap();
        let second = mock.send_command("MEAS:TEMP?").await.unwrap().unwrap();
        assert!(first.parse::<f64>().is_ok());
        assert_ne!(first, second);
    }
}
