//! # aquaclean-protocol
//!
//! Wire protocol spoken by AquaClean shower toilets over their BLE
//! write/notify characteristic pair.
//!
//! This crate provides:
//! - Frame headers and COBS-stuffed, `0x00`-delimited frames
//! - A notification stream decoder and an MTU-aware message encoder
//! - Reassembly of multi-frame messages by transaction id
//! - Request, report and acknowledgement body layouts

pub mod cobs;
pub mod codec;
pub mod collector;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use collector::{CollectorEvent, FrameCollector};
pub use error::{ProtocolError, ReassemblyError};
pub use frame::{Frame, FrameHeader, FrameKind, TransactionId};
pub use message::{Command, DataPointReport, Message, Request, WriteAck};

/// Byte that delimits frames on the wire.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Default BLE characteristic payload size in bytes.
pub const DEFAULT_MTU: usize = 20;

/// Maximum payload carried by a single frame.
///
/// Keeps raw frames (header, length byte, payload) below 254 bytes so that
/// stuffing always adds exactly one byte.
pub const MAX_FRAME_PAYLOAD: usize = 251;
