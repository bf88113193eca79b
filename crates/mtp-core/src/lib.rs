//! PTP/MTP host protocol engine.
//!
//! This crate drives a still-image class (MTP) device over a non-blocking USB
//! host stack:
//! - Container encoding and decoding for operations, data, responses and events
//! - Field and dataset decoders (DeviceInfo, StorageInfo, ObjectInfo, property
//!   descriptions, object property lists)
//! - A transaction engine running operation → data → response exchanges one
//!   poll at a time
//! - Session setup (OpenSession, device and storage enumeration) and event
//!   polling
//! - Blocking wrappers for the standard object, storage and property operations
//!
//! The USB host controller stays outside: implement [`UsbHost`] for it and hand
//! it to [`MtpDevice::claim`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codes;
pub mod container;
pub mod dataset;
pub mod decode;
pub mod device;
pub mod error;
pub mod events;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ops;
pub mod session;
pub mod transaction;
pub mod transport;

pub use codes::{DataType, EventCode, OperationCode, ResponseCode, ScalarType};
pub use container::{Container, EventContainer, Params, TransactionId};
pub use dataset::{DeviceInfo, ObjectInfo, StorageInfo};
pub use decode::{PropertyValue, StringDecoding};
pub use device::MtpDevice;
pub use error::{Error, FaultClass, Result};
pub use session::{SessionConfig, SessionState, SessionStatus};
pub use transaction::{ChunkSink, Completion, Request, TransactionEngine};
pub use transport::{EndpointDescriptor, MtpEndpoints, TransferKind, TransferState, UsbHost};
