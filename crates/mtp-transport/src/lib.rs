//! Async driver for the mtp-core engine.
//!
//! The engine is poll-driven and never blocks. This crate runs it on a tokio
//! runtime: operations become futures that hold the device for the whole
//! transaction and yield between engine steps, and a background ticker keeps
//! the session and event poller moving while no operation runs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

#[cfg(feature = "tokio")]
pub mod driver;

#[cfg(feature = "tokio")]
pub use driver::{AsyncMtpDevice, DriverConfig};
pub use error::{Error, Result};
