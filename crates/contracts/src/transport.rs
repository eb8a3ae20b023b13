//! Transport trait - Device wire-protocol abstraction
//!
//! Defines a unified interface over the instrument transports (raw TCP
//! SCPI, GPIB adapters, serial lines, mocks), decoupling the poll loop from
//! concrete framing. The poll loop owning a transport is its sole caller, so
//! command sequences are never interleaved on one connection.

use async_trait::async_trait;

use crate::ContractError;

/// Instrument transport trait
///
/// Implementations apply their configured timeout to every operation and
/// report expiry as a connect/command error rather than hanging.
#[async_trait]
pub trait Transport: Send {
    /// Short transport family tag (used for logging)
    fn kind(&self) -> &'static str;

    /// True while an underlying connection is established
    fn is_connected(&self) -> bool;

    /// Establish the underlying connection
    ///
    /// # Errors
    /// Returns a connect error on refusal, unreachability or timeout.
    async fn connect(&mut self) -> Result<(), ContractError>;

    /// Send one command and, for queries, read one response
    ///
    /// Returns `Some(response)` for commands that solicit a reply (SCPI
    /// convention: the command contains `?`), `None` for plain writes.
    ///
    /// # Errors
    /// Returns a command error on rejection, framing trouble or timeout.
    async fn send_command(&mut self, command: &str) -> Result<Option<String>, ContractError>;

    /// Release the connection; safe to call repeatedly
    async fn disconnect(&mut self) -> Result<(), ContractError>;
}
