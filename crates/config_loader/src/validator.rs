//! Configuration validation
//!
//! Rules:
//! - device ids unique and non-empty
//! - poll_interval_ms > 0, timeout_ms > 0
//! - read_commands and column_names non-empty
//! - channel_topics, when given, match column_names in length
//! - driver-specific addressing fields present (host/port, tty/baud, GPIB)
//! - mock driver: one query per column (it answers one value per query)
//! - backoff_base_ms <= backoff_max_ms, failure_threshold >= 1
//! - sink names unique and non-empty, required sink params present

use std::collections::HashSet;

use contracts::{ContractError, DeviceDescriptor, DriverKind, LoggerBlueprint, SinkType};

/// Validate a LoggerBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &LoggerBlueprint) -> Result<(), ContractError> {
    validate_poll_defaults(blueprint)?;
    validate_device_ids(blueprint)?;
    for device in &blueprint.devices {
        validate_device(device)?;
    }
    validate_sinks(blueprint)?;
    Ok(())
}

fn validate_poll_defaults(blueprint: &LoggerBlueprint) -> Result<(), ContractError> {
    let poll = &blueprint.poll;
    if poll.backoff_base_ms == 0 {
        return Err(ContractError::config_validation(
            "poll.backoff_base_ms",
            "backoff base must be > 0",
        ));
    }
    if poll.backoff_base_ms > poll.backoff_max_ms {
        return Err(ContractError::config_validation(
            "poll.backoff_base_ms / poll.backoff_max_ms",
            format!(
                "backoff_base_ms ({}) must be <= backoff_max_ms ({})",
                poll.backoff_base_ms, poll.backoff_max_ms
            ),
        ));
    }
    if poll.failure_threshold == 0 {
        return Err(ContractError::config_validation(
            "poll.failure_threshold",
            "failure threshold must be >= 1",
        ));
    }
    Ok(())
}

/// Device ids must be globally unique
fn validate_device_ids(blueprint: &LoggerBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for device in &blueprint.devices {
        if device.id.is_empty() {
            return Err(ContractError::config_validation(
                "devices[].id",
                "device id cannot be empty",
            ));
        }
        if !seen.insert(&device.id) {
            return Err(ContractError::config_validation(
                format!("devices[id={}]", device.id),
                "duplicate device id",
            ));
        }
    }
    Ok(())
}

fn validate_device(device: &DeviceDescriptor) -> Result<(), ContractError> {
    let field = |name: &str| format!("devices[{}].{}", device.id, name);

    if device.poll_interval_ms == 0 {
        return Err(ContractError::config_validation(
            field("poll_interval_ms"),
            "poll interval must be > 0",
        ));
    }
    if device.connection.timeout_ms == 0 {
        return Err(ContractError::config_validation(
            field("connection.timeout_ms"),
            "timeout must be > 0",
        ));
    }
    if device.read_commands.is_empty() {
        return Err(ContractError::config_validation(
            field("read_commands"),
            "at least one read command is required",
        ));
    }
    if device.column_names.is_empty() {
        return Err(ContractError::config_validation(
            field("column_names"),
            "at least one column name is required",
        ));
    }
    if device.base_topic.is_empty() {
        return Err(ContractError::config_validation(
            field("base_topic"),
            "base topic cannot be empty",
        ));
    }
    if !device.channel_topics.is_empty() && device.channel_topics.len() != device.column_names.len()
    {
        return Err(ContractError::config_validation(
            field("channel_topics"),
            format!(
                "channel_topics length ({}) must match column_names length ({})",
                device.channel_topics.len(),
                device.column_names.len()
            ),
        ));
    }
    if let Some(threshold) = device.failure_threshold {
        if threshold == 0 {
            return Err(ContractError::config_validation(
                field("failure_threshold"),
                "failure threshold must be >= 1",
            ));
        }
    }

    validate_connection(device)
}

/// Addressing requirements per driver kind
fn validate_connection(device: &DeviceDescriptor) -> Result<(), ContractError> {
    let conn = &device.connection;
    let field = |name: &str| format!("devices[{}].connection.{}", device.id, name);

    match device.driver {
        DriverKind::Mock => {
            // The mock transport answers every query with a single value, so
            // the query count must equal the column count.
            let queries = device
                .read_commands
                .iter()
                .filter(|cmd| cmd.contains('?'))
                .count();
            if queries != device.column_names.len() {
                return Err(ContractError::config_validation(
                    format!("devices[{}].read_commands", device.id),
                    format!(
                        "mock driver needs one query per column: {} queries, {} columns",
                        queries,
                        device.column_names.len()
                    ),
                ));
            }
        }
        DriverKind::ScpiTcp => {
            if conn.host.is_none() {
                return Err(ContractError::config_validation(
                    field("host"),
                    "scpi_tcp requires a host",
                ));
            }
            if conn.port.is_none() {
                return Err(ContractError::config_validation(
                    field("port"),
                    "scpi_tcp requires a port",
                ));
            }
        }
        DriverKind::Prologix => {
            if conn.host.is_none() || conn.port.is_none() {
                return Err(ContractError::config_validation(
                    field("host"),
                    "prologix requires host and port of the adapter",
                ));
            }
            if conn.gpib_address.is_none() {
                return Err(ContractError::config_validation(
                    field("gpib_address"),
                    "prologix requires the GPIB primary address",
                ));
            }
        }
        DriverKind::ScpiSerial => {
            if conn.tty.is_none() {
                return Err(ContractError::config_validation(
                    field("tty"),
                    "scpi_serial requires a tty path",
                ));
            }
            if conn.baud_rate.is_none() {
                return Err(ContractError::config_validation(
                    field("baud_rate"),
                    "scpi_serial requires a baud rate",
                ));
            }
        }
    }
    Ok(())
}

/// Sink names must be unique; required params must be present
fn validate_sinks(blueprint: &LoggerBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(&sink.name) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(ContractError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue capacity must be > 0",
            ));
        }
        match sink.sink_type {
            SinkType::File => {
                if sink.params.get("path").is_none_or(|p| p.is_empty()) {
                    return Err(ContractError::config_validation(
                        format!("sinks[{}].params.path", sink.name),
                        "file sink requires a 'path' parameter",
                    ));
                }
            }
            SinkType::Broker => {
                if sink.params.get("hosts").is_none_or(|h| h.is_empty()) {
                    return Err(ContractError::config_validation(
                        format!("sinks[{}].params.hosts", sink.name),
                        "broker sink requires a 'hosts' parameter",
                    ));
                }
            }
            SinkType::Log => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ConfigVersion, ConnectionParams, PollDefaults, SinkConfig,
    };
    use std::collections::HashMap;

    fn tcp_device(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            driver: DriverKind::ScpiTcp,
            connection: ConnectionParams {
                host: Some("192.168.1.5".into()),
                port: Some(5025),
                ..ConnectionParams::default()
            },
            poll_interval_ms: 1000,
            initial_commands: vec![],
            read_commands: vec!["READ?".into()],
            post_read_commands: vec![],
            column_names: vec!["voltage".into()],
            base_topic: format!("sensors/lab/{id}"),
            channel_topics: vec![],
            failure_threshold: None,
        }
    }

    fn minimal_blueprint() -> LoggerBlueprint {
        LoggerBlueprint {
            version: ConfigVersion::V1,
            poll: PollDefaults::default(),
            devices: vec![tcp_device("dmm0")],
            sinks: vec![SinkConfig {
                name: "log".into(),
                sink_type: SinkType::Log,
                queue_capacity: 100,
                params: HashMap::new(),
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        let bp = minimal_blueprint();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_duplicate_device_id() {
        let mut bp = minimal_blueprint();
        bp.devices.push(bp.devices[0].clone());
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate device id"), "got: {err}");
    }

    #[test]
    fn test_zero_interval() {
        let mut bp = minimal_blueprint();
        bp.devices[0].poll_interval_ms = 0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("poll interval"), "got: {err}");
    }

    #[test]
    fn test_missing_read_commands() {
        let mut bp = minimal_blueprint();
        bp.devices[0].read_commands.clear();
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("read command"), "got: {err}");
    }

    #[test]
    fn test_missing_tcp_host() {
        let mut bp = minimal_blueprint();
        bp.devices[0].connection.host = None;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("requires a host"), "got: {err}");
    }

    #[test]
    fn test_prologix_needs_gpib_address() {
        let mut bp = minimal_blueprint();
        bp.devices[0].driver = DriverKind::Prologix;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("GPIB"), "got: {err}");
    }

    #[test]
    fn test_serial_needs_tty() {
        let mut bp = minimal_blueprint();
        bp.devices[0].driver = DriverKind::ScpiSerial;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("tty"), "got: {err}");
    }

    #[test]
    fn test_mock_query_column_mismatch() {
        let mut bp = minimal_blueprint();
        bp.devices[0].driver = DriverKind::Mock;
        bp.devices[0].column_names = vec!["a".into(), "b".into()];
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("one query per column"), "got: {err}");
    }

    #[test]
    fn test_channel_topics_length_mismatch() {
        let mut bp = minimal_blueprint();
        bp.devices[0].channel_topics = vec!["a".into(), "b".into()];
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("channel_topics"), "got: {err}");
    }

    #[test]
    fn test_backoff_range() {
        let mut bp = minimal_blueprint();
        bp.poll.backoff_base_ms = 60_000;
        bp.poll.backoff_max_ms = 1_000;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("backoff_base_ms"), "got: {err}");
    }

    #[test]
    fn test_file_sink_requires_path() {
        let mut bp = minimal_blueprint();
        bp.sinks.push(SinkConfig {
            name: "file".into(),
            sink_type: SinkType::File,
            queue_capacity: 100,
            params: HashMap::new(),
        });
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("'path'"), "got: {err}");
    }

    #[test]
    fn test_broker_sink_requires_hosts() {
        let mut bp = minimal_blueprint();
        bp.sinks.push(SinkConfig {
            name: "broker".into(),
            sink_type: SinkType::Broker,
            queue_capacity: 100,
            params: HashMap::new(),
        });
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("'hosts'"), "got: {err}");
    }

    #[test]
    fn test_duplicate_sink_name() {
        let mut bp = minimal_blueprint();
        bp.sinks.push(bp.sinks[0].clone());
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate sink name"), "got: {err}");
    }
}
