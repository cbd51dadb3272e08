//! # aquaclean
//!
//! BLE binary protocol engine for Geberit AquaClean shower toilets.
//!
//! The engine is split across workspace crates:
//! - `aquaclean-protocol`: frame codec, COBS stuffing and message reassembly
//! - `aquaclean-core`: data point registry and model capability resolution
//! - `aquaclean-client`: transactions, device state and the [`Session`] API
//!
//! This crate adds file and environment configuration plus logging setup.
//!
//! ```no_run
//! use aquaclean::{init_logging, ChannelTransport, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = Config::load()?;
//! init_logging(&config.logging)?;
//!
//! let (transport, _outgoing) = ChannelTransport::new();
//! let session = config.build_session(transport)?;
//! # let _ = session;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;

pub use aquaclean_client::{
    ChannelTransport, ClientError, Session, SessionConfig, StateChange, StateSnapshot, Transport,
    TransportError, Verbosity,
};
pub use aquaclean_core::{DataPointId, DataPointValue, DeviceCapabilityProfile, ModelTier};
pub use aquaclean_protocol::Command;
pub use config::{Config, ConfigError, LoggingConfig, SessionSettings, TableConfig};
pub use logging::init_logging;
