//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for Sinks.

use crate::{ContractError, Reading};

/// Data output trait
///
/// All sink implementations must implement this trait. A sink is driven by a
/// single worker task, so implementations only need to be single-consumer
/// safe; they never see concurrent `write` calls.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one reading
    ///
    /// Best-effort: transient I/O problems should be retried or buffered
    /// internally rather than bubbled up.
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, reading: &Reading) -> Result<(), ContractError>;

    /// Flush buffered output (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink, idempotent
    async fn close(&mut self) -> Result<(), ContractError>;
}
