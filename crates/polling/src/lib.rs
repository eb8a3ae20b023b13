//! # Polling
//!
//! Per-device acquisition module.
//!
//! Responsibilities:
//! - One poll loop task per device: connect, run read cycles on the
//!   configured cadence, apply the retry/backoff policy
//! - Isolate failures: one device's timeouts never delay another device
//! - Emit readings onto a shared bounded bus without blocking acquisition
//!
//! ## Usage Example
//!
//! ```ignore
//! use polling::{PollerSet, PollLoopConfig};
//!
//! let mut pollers = PollerSet::new(100);
//! for handle in handles {
//!     pollers.register(handle, PollLoopConfig::default());
//! }
//! pollers.start_all();
//! let rx = pollers.take_receiver().unwrap();
//! while let Ok(reading) = rx.recv().await {
//!     // forward to the dispatcher
//! }
//! let reports = pollers.shutdown(Duration::from_secs(5)).await;
//! ```

mod backoff;
mod config;
mod poll_loop;
mod set;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::{MetricsSnapshot, PollLoopConfig, PollMetrics};
pub use contracts::Reading;
pub use poll_loop::{FinalState, PollLoop, PollReport};
pub use set::PollerSet;
