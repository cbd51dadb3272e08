//! Core error types.

use crate::datapoint::DataPointId;
use thiserror::Error;

/// Errors from the data point registry and capability table.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown data point: {0}")]
    UnknownDataPoint(DataPointId),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid table: {reason}")]
    InvalidTable { reason: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn invalid_table(reason: impl Into<String>) -> Self {
        CoreError::InvalidTable {
            reason: reason.into(),
        }
    }

    /// Returns whether the value was rejected before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }

    /// Returns whether a received payload could not be interpreted.
    ///
    /// Callers treat this as "value currently unavailable".
    pub fn is_decode(&self) -> bool {
        matches!(self, CoreError::Decode(_))
    }
}

/// A value was rejected before encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("data point {id} is read-only")]
    NotWritable { id: DataPointId },

    #[error("data point {id} is write-only")]
    NotReadable { id: DataPointId },

    #[error("data point {id} expects {expected}, got {actual}")]
    TypeMismatch {
        id: DataPointId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value {value} out of range for data point {id} ({min}..={max})")]
    OutOfRange {
        id: DataPointId,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("text of {len} bytes too long for data point {id} (max {max})")]
    TextTooLong {
        id: DataPointId,
        len: usize,
        max: usize,
    },
}

/// A received payload did not match the data point's encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload for data point {id} truncated: need {expected} bytes, got {actual}")]
    Truncated {
        id: DataPointId,
        expected: usize,
        actual: usize,
    },

    #[error("invalid value {value} for data point {id}")]
    InvalidValue { id: DataPointId, value: i64 },

    #[error("invalid UTF-8 in data point {id}")]
    InvalidUtf8 { id: DataPointId },
}
