//! Protocol error types.

use crate::frame::{FrameKind, TransactionId};
use thiserror::Error;

/// Framing errors raised while stuffing, unstuffing or parsing a single frame.
///
/// A framing error invalidates only the frame it was raised for; the
/// notification stream and the session stay usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame after unstuffing")]
    EmptyFrame,

    #[error("malformed byte stuffing at offset {offset}")]
    MalformedStuffing { offset: usize },

    #[error("unexpected delimiter inside frame at offset {offset}")]
    UnexpectedDelimiter { offset: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame payload truncated: declared {declared} bytes, got {actual}")]
    TruncatedPayload { declared: usize, actual: usize },

    #[error("transaction id out of range: {0} (max 7)")]
    InvalidTransaction(u8),

    #[error("MTU of {0} bytes leaves no room for payload")]
    MtuTooSmall(usize),

    #[error("receive buffer overflow: {buffered} bytes without delimiter")]
    Overflow { buffered: usize },

    #[error("message body too short: need {needed} bytes, got {actual}")]
    BodyTooShort { needed: usize, actual: usize },

    #[error("unknown command id: {0}")]
    UnknownCommand(u16),

    #[error("unknown access flag: {0:#04x}")]
    UnknownAccessFlag(u8),
}

/// Reassembly anomalies reported by the frame collector.
///
/// All of these mean "drop this frame"; the collector stays alive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("continuation for unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("continuation for already completed transaction {0}")]
    AlreadyComplete(TransactionId),

    #[error("frame kind {0:?} cannot be part of a message")]
    UnexpectedKind(FrameKind),

    #[error("message for transaction {transaction} exceeds {max} bytes")]
    MessageTooLarge { transaction: TransactionId, max: usize },
}
