//! Sink implementations
//!
//! Contains LogSink, FileSink, and BrokerSink.

mod broker;
mod file;
mod log;

pub use self::broker::BrokerSink;
pub use self::file::FileSink;
pub use self::log::LogSink;
