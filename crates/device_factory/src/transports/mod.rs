//! Transport implementations
//!
//! One module per wire family: raw TCP SCPI, Prologix GPIB-over-ethernet,
//! serial lines (feature-gated) and the mock used by tests and demos.

mod mock;
mod prologix;
#[cfg(feature = "serial")]
mod serial;
mod tcp;

pub use self::mock::{MockJournal, MockTransport};
pub use self::prologix::PrologixTransport;
#[cfg(feature = "serial")]
pub use self::serial::SerialTransport;
pub use self::tcp::TcpTransport;
