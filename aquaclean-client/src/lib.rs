//! # aquaclean-client
//!
//! Session layer for AquaClean devices.
//!
//! This crate provides:
//! - A transport abstraction over the BLE write characteristic
//! - Transaction correlation with timeouts and exponential backoff
//! - A device state store with change notifications
//! - [`Session`], the typed read/write/command interface

pub mod config;
pub mod error;
pub mod session;
pub mod state;
pub mod transaction;
pub mod transport;

pub use config::{SessionConfig, Verbosity};
pub use error::ClientError;
pub use session::Session;
pub use state::{DeviceStateStore, StateChange, StateSnapshot};
pub use transaction::TransactionManager;
pub use transport::{ChannelTransport, Transport, TransportError};
