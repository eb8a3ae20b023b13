//! # Dispatcher
//!
//! Reading fan-out module.
//!
//! Responsibilities:
//! - Consume `Reading`s from the acquisition bus
//! - Fan out to every configured sink
//! - Isolate slow sinks behind bounded per-sink queues; when a queue is
//!   full, the oldest queued reading is evicted so acquisition never stalls

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{DataSink, Reading};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{BrokerSink, FileSink, LogSink};
