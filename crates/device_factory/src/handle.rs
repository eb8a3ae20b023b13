//! DeviceHandle - runtime connection object for one instrument
//!
//! Owned exclusively by the device's poll loop; no other task ever touches
//! the transport, which keeps command sequences from interleaving on one
//! physical connection.

use std::time::Instant;

use chrono::Utc;
use contracts::{ContractError, DeviceDescriptor, DeviceId, Reading, Transport, Value};
use tracing::{debug, info, instrument};

/// Connection lifecycle state, for logging and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Disconnected,
    Connecting,
    Ready,
    Reading,
    Faulted,
}

/// Runtime handle for one configured instrument.
///
/// Wraps the resolved transport plus the descriptor's command sequences.
/// Initialization is atomic: either every initial command succeeds in order
/// and the handle is `Ready`, or the transport is torn down again.
pub struct DeviceHandle {
    descriptor: DeviceDescriptor,
    device_id: DeviceId,
    transport: Box<dyn Transport>,
    state: HandleState,
    started: Instant,
    cardinality_bound: bool,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("descriptor", &self.descriptor)
            .field("device_id", &self.device_id)
            .field("transport", &self.transport.kind())
            .field("state", &self.state)
            .field("cardinality_bound", &self.cardinality_bound)
            .finish()
    }
}

impl DeviceHandle {
    pub fn new(descriptor: DeviceDescriptor, transport: Box<dyn Transport>) -> Self {
        let device_id = DeviceId::from(descriptor.id.as_str());
        Self {
            descriptor,
            device_id,
            transport,
            state: HandleState::Disconnected,
            started: Instant::now(),
            cardinality_bound: false,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Establish the transport and run `initial_commands` strictly in order.
    ///
    /// Any failure tears the transport down again so the instrument is never
    /// left half-initialized behind a `Ready` handle.
    #[instrument(name = "device_connect", skip(self), fields(device = %self.device_id))]
    pub async fn connect(&mut self) -> Result<(), ContractError> {
        self.state = HandleState::Connecting;

        if let Err(e) = self.transport.connect().await {
            self.state = HandleState::Disconnected;
            return Err(e);
        }

        for cmd in &self.descriptor.initial_commands {
            debug!(device = %self.device_id, command = %cmd, "running initial command");
            if let Err(e) = self.transport.send_command(cmd).await {
                let _ = self.transport.disconnect().await;
                self.state = HandleState::Disconnected;
                return Err(e);
            }
        }

        self.state = HandleState::Ready;
        info!(
            device = %self.device_id,
            transport = self.transport.kind(),
            initial_commands = self.descriptor.initial_commands.len(),
            "device initialized"
        );
        Ok(())
    }

    /// Execute one read cycle: `read_commands` in order, then
    /// `post_read_commands`.
    ///
    /// The cycle fails atomically: a command error, or a flattened value
    /// count that differs from `column_names`, yields an error and no
    /// reading. Query responses are split on commas, so one command may
    /// contribute several channels.
    pub async fn read_cycle(&mut self, seq: u64) -> Result<Reading, ContractError> {
        self.state = HandleState::Reading;
        let timestamp = Utc::now();
        let monotonic = self.started.elapsed();

        let mut values: Vec<Value> = Vec::with_capacity(self.descriptor.column_names.len());
        for cmd in &self.descriptor.read_commands {
            match self.transport.send_command(cmd).await {
                Ok(Some(response)) => {
                    values.extend(response.split(',').map(Value::parse));
                }
                Ok(None) => {}
                Err(e) => {
                    self.state = HandleState::Faulted;
                    return Err(e);
                }
            }
        }

        let expected = self.descriptor.column_names.len();
        if values.len() != expected {
            self.state = HandleState::Faulted;
            return Err(ContractError::data_format(
                self.device_id.as_str(),
                format!("expected {} values, got {}", expected, values.len()),
            ));
        }
        if !self.cardinality_bound {
            // Cardinality is only observable at runtime; log the first
            // successful binding once.
            debug!(device = %self.device_id, channels = expected, "channel cardinality confirmed");
            self.cardinality_bound = true;
        }

        for cmd in &self.descriptor.post_read_commands {
            if let Err(e) = self.transport.send_command(cmd).await {
                self.state = HandleState::Faulted;
                return Err(e);
            }
        }

        self.state = HandleState::Ready;
        Ok(Reading {
            device_id: self.device_id.clone(),
            seq,
            timestamp,
            monotonic,
            values,
        })
    }

    /// Release the transport. Safe to call in any state, repeatedly.
    #[instrument(name = "device_disconnect", skip(self), fields(device = %self.device_id))]
    pub async fn disconnect(&mut self) -> Result<(), ContractError> {
        let result = self.transport.disconnect().await;
        self.state = HandleState::Disconnected;
        result
    }
}
