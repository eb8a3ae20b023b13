//! LoggerBlueprint - Config Loader output
//!
//! Describes the complete acquisition setup: devices, their command
//! sequences and cadences, and the output sinks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete acquisition blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Workspace-wide retry/backoff defaults
    #[serde(default)]
    pub poll: PollDefaults,

    /// Device descriptors
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,

    /// Output routing configuration
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// Retry/backoff defaults, overridable per device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollDefaults {
    /// First reconnect delay after a failure (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Reconnect delay ceiling (milliseconds)
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Consecutive read failures before the connection is torn down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for PollDefaults {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    3
}

/// Static configuration of one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique identifier
    pub id: String,

    /// Wire protocol family
    pub driver: DriverKind,

    /// Transport addressing and timeout
    #[serde(default)]
    pub connection: ConnectionParams,

    /// Read cadence (milliseconds), must be > 0
    pub poll_interval_ms: u64,

    /// Sent once after connecting, strictly in order. Order matters: some
    /// commands only take effect after the previous one completed.
    #[serde(default)]
    pub initial_commands: Vec<String>,

    /// Sent every cycle, strictly in order
    pub read_commands: Vec<String>,

    /// Sent after every cycle (e.g. re-arm a trigger)
    #[serde(default)]
    pub post_read_commands: Vec<String>,

    /// One name per value a cycle yields, in response order
    pub column_names: Vec<String>,

    /// Topic prefix for broker routing
    pub base_topic: String,

    /// Optional per-channel topic suffixes; defaults to the channel index
    #[serde(default)]
    pub channel_topics: Vec<String>,

    /// Per-device override of `poll.failure_threshold`
    #[serde(default)]
    pub failure_threshold: Option<u32>,
}

impl DeviceDescriptor {
    /// Topic one channel publishes under: `base_topic/<suffix>` when a
    /// suffix is configured, `base_topic/<index>` otherwise.
    pub fn channel_topic(&self, channel: usize) -> String {
        match self.channel_topics.get(channel) {
            Some(suffix) => format!("{}/{}", self.base_topic, suffix),
            None => format!("{}/{}", self.base_topic, channel),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Wire protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Simulated instrument, no hardware required
    Mock,
    /// SCPI over a raw TCP socket
    ScpiTcp,
    /// GPIB bus behind a Prologix-style ethernet adapter
    Prologix,
    /// SCPI over a local serial line
    ScpiSerial,
}

/// Transport addressing
///
/// Which fields are required depends on the driver kind; the config
/// validator enforces the combination, not the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Target host (scpi_tcp, prologix)
    #[serde(default)]
    pub host: Option<String>,

    /// Target port (scpi_tcp, prologix)
    #[serde(default)]
    pub port: Option<u16>,

    /// Serial device path (scpi_serial)
    #[serde(default)]
    pub tty: Option<String>,

    /// Serial baud rate (scpi_serial)
    #[serde(default)]
    pub baud_rate: Option<u32>,

    /// GPIB primary address (prologix)
    #[serde(default)]
    pub gpib_address: Option<u8>,

    /// Per-operation timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            tty: None,
            baud_rate: None,
            gpib_address: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ConnectionParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    3000
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// CSV file output
    File,
    /// MQTT broker output
    Broker,
}

impl LoggerBlueprint {
    /// Effective consecutive-failure threshold for one device.
    pub fn failure_threshold(&self, device: &DeviceDescriptor) -> u32 {
        device.failure_threshold.unwrap_or(self.poll.failure_threshold)
    }

    pub fn device(&self, id: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.id == id)
    }
}
