//! # aquaclean-core
//!
//! Device knowledge for AquaClean.
//!
//! This crate provides:
//! - Data point descriptors and value encodings
//! - A table-driven data point registry
//! - Model tier resolution and capability profiles

pub mod capability;
pub mod datapoint;
pub mod error;
pub mod registry;

pub use capability::{
    normalize_model, CapabilityTable, CapabilityTableRaw, DeviceCapabilityProfile, FamilyPattern,
    ModelTier, TierSpec,
};
pub use datapoint::{DataPointId, DataPointSpec, DataPointValue, Direction, Encoding, Rgb};
pub use error::{CoreError, DecodeError, ValidationError};
pub use registry::{DataPointRegistry, DataPointTable};
