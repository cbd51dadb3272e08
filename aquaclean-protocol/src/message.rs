//! Application messages and their body layouts.
//!
//! All multi-byte fields are little-endian:
//!
//! ```text
//! read request:   id:u16 | 0x00
//! write request:  id:u16 | 0x01 | value
//! command:        command:u16
//! report:         id:u16 | value            (read response / notification)
//! write ack:      id:u16 | status:u8        (0 = accepted)
//! ```
//!
//! Requests are told apart by length: a two-byte body is a command, anything
//! longer addresses a data point.

use crate::error::ProtocolError;
use crate::frame::TransactionId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Access flag for read requests.
pub const READ_FLAG: u8 = 0x00;
/// Access flag for write requests.
pub const WRITE_FLAG: u8 = 0x01;
/// Body length of a high-level command.
pub const COMMAND_LEN: usize = 2;
/// Write acknowledgement status for an accepted value.
pub const STATUS_ACCEPTED: u8 = 0x00;

/// A complete application message reassembled from one or more frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub transaction: TransactionId,
    /// Message-Type flag of the first frame.
    pub message_type: bool,
    pub body: Bytes,
    /// Number of frames the message arrived in.
    pub frames: usize,
}

/// High-level device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ToggleAnalShower,
    ToggleLadyShower,
    ToggleDryer,
    StartCleaningDevice,
    ExecuteNextCleaningStep,
    PrepareDescaling,
    ConfirmDescaling,
    CancelDescaling,
    PostponeDescaling,
    ToggleLidPosition,
    ToggleOrientationLight,
    StartLidPositionCalibration,
    LidPositionOffsetSave,
    LidPositionOffsetIncrement,
    LidPositionOffsetDecrement,
    TriggerFlushManually,
    ResetFilterCounter,
}

impl Command {
    pub fn id(&self) -> u16 {
        match self {
            Command::ToggleAnalShower => 0,
            Command::ToggleLadyShower => 1,
            Command::ToggleDryer => 2,
            Command::StartCleaningDevice => 4,
            Command::ExecuteNextCleaningStep => 5,
            Command::PrepareDescaling => 6,
            Command::ConfirmDescaling => 7,
            Command::CancelDescaling => 8,
            Command::PostponeDescaling => 9,
            Command::ToggleLidPosition => 10,
            Command::ToggleOrientationLight => 20,
            Command::StartLidPositionCalibration => 33,
            Command::LidPositionOffsetSave => 34,
            Command::LidPositionOffsetIncrement => 35,
            Command::LidPositionOffsetDecrement => 36,
            Command::TriggerFlushManually => 37,
            Command::ResetFilterCounter => 47,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        let command = match id {
            0 => Command::ToggleAnalShower,
            1 => Command::ToggleLadyShower,
            2 => Command::ToggleDryer,
            4 => Command::StartCleaningDevice,
            5 => Command::ExecuteNextCleaningStep,
            6 => Command::PrepareDescaling,
            7 => Command::ConfirmDescaling,
            8 => Command::CancelDescaling,
            9 => Command::PostponeDescaling,
            10 => Command::ToggleLidPosition,
            20 => Command::ToggleOrientationLight,
            33 => Command::StartLidPositionCalibration,
            34 => Command::LidPositionOffsetSave,
            35 => Command::LidPositionOffsetIncrement,
            36 => Command::LidPositionOffsetDecrement,
            37 => Command::TriggerFlushManually,
            47 => Command::ResetFilterCounter,
            _ => return None,
        };
        Some(command)
    }
}

/// An outgoing request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadDataPoint { id: u16 },
    WriteDataPoint { id: u16, value: Bytes },
    Command(Command),
}

impl Request {
    /// Encodes the request body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        match self {
            Request::ReadDataPoint { id } => {
                buf.put_u16_le(*id);
                buf.put_u8(READ_FLAG);
            }
            Request::WriteDataPoint { id, value } => {
                buf.put_u16_le(*id);
                buf.put_u8(WRITE_FLAG);
                buf.put_slice(value);
            }
            Request::Command(command) => {
                buf.put_u16_le(command.id());
            }
        }
        buf.freeze()
    }

    /// Decodes a request body, as a device would.
    pub fn decode(mut body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() == COMMAND_LEN {
            let command_id = body.get_u16_le();
            return Command::from_id(command_id)
                .map(Request::Command)
                .ok_or(ProtocolError::UnknownCommand(command_id));
        }

        ensure_len(body, 3)?;
        let id = body.get_u16_le();
        match body.get_u8() {
            READ_FLAG => Ok(Request::ReadDataPoint { id }),
            WRITE_FLAG => Ok(Request::WriteDataPoint {
                id,
                value: Bytes::copy_from_slice(body),
            }),
            flag => Err(ProtocolError::UnknownAccessFlag(flag)),
        }
    }

    /// Returns the data point a request addresses, if any.
    pub fn data_point(&self) -> Option<u16> {
        match self {
            Request::ReadDataPoint { id } | Request::WriteDataPoint { id, .. } => Some(*id),
            Request::Command(_) => None,
        }
    }
}

/// A data point value reported by the device.
///
/// An empty value means the device has no data for the point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPointReport {
    pub id: u16,
    pub value: Bytes,
}

impl DataPointReport {
    pub fn new(id: u16, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }

    pub fn parse(body: &Bytes) -> Result<Self, ProtocolError> {
        ensure_len(body, 2)?;
        let id = u16::from_le_bytes([body[0], body[1]]);
        Ok(Self {
            id,
            value: body.slice(2..),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.value.len());
        buf.put_u16_le(self.id);
        buf.put_slice(&self.value);
        buf.freeze()
    }
}

/// Device acknowledgement of a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub id: u16,
    pub status: u8,
}

impl WriteAck {
    pub fn parse(mut body: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(body, 3)?;
        Ok(Self {
            id: body.get_u16_le(),
            status: body.get_u8(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u16_le(self.id);
        buf.put_u8(self.status);
        buf.freeze()
    }

    pub fn is_accepted(&self) -> bool {
        self.status == STATUS_ACCEPTED
    }
}

fn ensure_len(body: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if body.len() < needed {
        return Err(ProtocolError::BodyTooShort {
            needed,
            actual: body.len(),
        });
    }
    Ok(())
}
