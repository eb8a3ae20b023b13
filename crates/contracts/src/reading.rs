//! Reading - Poll loop output
//!
//! One timestamped set of channel values from one device. Immutable once
//! constructed; shared by value across all sinks.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// A single channel value.
///
/// Most instruments answer with numbers, but some channels report status
/// strings (e.g. a range or mode indicator), so text is carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Parse one response field. Numeric if it parses as f64 (covers the
    /// usual SCPI `+1.234E-03` notation), text otherwise.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One completed read cycle of one device.
///
/// `values` is ordered exactly like the descriptor's `column_names`; the
/// poll loop never emits a reading whose cardinality differs from that list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Producing device
    pub device_id: DeviceId,

    /// Per-device cycle counter, monotonically increasing
    pub seq: u64,

    /// Wall-clock capture time (UTC)
    pub timestamp: DateTime<Utc>,

    /// Monotonic offset from process start, immune to clock steps
    pub monotonic: Duration,

    /// Channel values in `column_names` order
    pub values: Vec<Value>,
}

impl Reading {
    pub fn value_count(&self) -> usize {
        self.values.len()
    }
}
