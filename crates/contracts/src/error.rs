//! Layered error definitions
//!
//! Categorized by source: config / device / sink. Device-level errors are
//! contained by the owning poll loop, sink-level errors by the owning sink
//! worker; only configuration errors are fatal, and only at startup.

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Device Errors =====
    /// Transport could not be established (unreachable, refused, handshake)
    #[error("device '{device_id}' connect error: {message}")]
    Connect { device_id: String, message: String },

    /// A command was rejected or timed out
    #[error("device '{device_id}' command '{command}' failed: {message}")]
    Command {
        device_id: String,
        command: String,
        message: String,
    },

    /// A read cycle returned the wrong channel cardinality or garbage
    #[error("device '{device_id}' returned malformed data: {message}")]
    DataFormat { device_id: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create device connect error
    pub fn connect(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            device_id: device_id.into(),
            message: message.into(),
        }
    }

    /// Create device command error
    pub fn command(
        device_id: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Command {
            device_id: device_id.into(),
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create malformed-data error
    pub fn data_format(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataFormat {
            device_id: device_id.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create sink connection error
    pub fn sink_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// True for errors that must abort startup instead of being retried.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. } | Self::ConfigValidation { .. }
        )
    }
}
