//! Client error types.

use crate::transport::TransportError;
use aquaclean_core::{CoreError, DataPointId};
use aquaclean_protocol::{ProtocolError, TransactionId};
use thiserror::Error;

/// Session errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("transaction {transaction} timed out after {attempts} attempts")]
    Timeout {
        transaction: TransactionId,
        attempts: u32,
    },

    #[error("transaction {0} cancelled")]
    Cancelled(TransactionId),

    #[error("session disconnected")]
    Disconnected,

    #[error("device rejected write to data point {id} (status {status})")]
    Rejected { id: DataPointId, status: u8 },

    #[error("unexpected response: {reason}")]
    UnexpectedResponse { reason: String },

    #[error("no free transaction id")]
    NoTransactionAvailable,
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout { .. } => true,
            ClientError::NoTransactionAvailable => true,
            ClientError::Transport(e) => !e.is_fatal(),
            _ => false,
        }
    }

    /// Returns whether the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Disconnected => true,
            ClientError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}
