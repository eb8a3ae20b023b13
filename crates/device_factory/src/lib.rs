//! # Device Factory
//!
//! Instrument construction and lifecycle module.
//!
//! Responsibilities:
//! - Resolve a descriptor's driver kind into a concrete transport, once,
//!   at construction time
//! - Own the `DeviceHandle` runtime object (connect / read cycle /
//!   disconnect)
//! - Provide the mock transport used by tests and hardware-free demos
//!
//! The `scpi_serial` driver kind is only available with the `serial`
//! feature; building without it turns that kind into a startup error.

mod error;
mod factory;
mod handle;
pub mod transports;

pub use error::{FactoryError, Result};
pub use factory::DeviceFactory;
pub use handle::{DeviceHandle, HandleState};
pub use transports::{MockJournal, MockTransport};
