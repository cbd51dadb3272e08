//! Wire frame format.
//!
//! A frame is a one-byte header followed by the payload. Consecutive frames
//! additionally carry the payload length right after the header. The raw
//! frame is COBS-stuffed and terminated with a `0x00` delimiter:
//!
//! ```text
//! header byte:
//! +----------+----------+-------------+-------+
//! | frame id | msg type | transaction | final |
//! | bits 7-5 |  bit 4   |  bits 3-1   | bit 0 |
//! +----------+----------+-------------+-------+
//!
//! raw frame:  header | [len] | payload
//! wire frame: cobs(raw frame) | 0x00
//! ```

use crate::cobs;
use crate::error::ProtocolError;
use crate::{FRAME_DELIMITER, MAX_FRAME_PAYLOAD};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Role of a frame within a message, taken from the 3-bit frame id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Single frame, or the first frame of a multi-frame message.
    Start,
    /// Continuation of a multi-frame message.
    Consecutive,
    /// Link-level acknowledgement and flow control.
    FlowControl,
    /// First frame of an extended message.
    Extended,
    /// Ids 1, 5, 6 and 7 have no known meaning.
    Reserved(u8),
}

impl FrameKind {
    pub fn from_id(id: u8) -> Self {
        match id & 0x07 {
            0 => FrameKind::Start,
            2 => FrameKind::Consecutive,
            3 => FrameKind::FlowControl,
            4 => FrameKind::Extended,
            other => FrameKind::Reserved(other),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            FrameKind::Start => 0,
            FrameKind::Consecutive => 2,
            FrameKind::FlowControl => 3,
            FrameKind::Extended => 4,
            FrameKind::Reserved(id) => id & 0x07,
        }
    }

    /// Returns whether a frame of this kind opens a new message.
    pub fn starts_message(&self) -> bool {
        matches!(self, FrameKind::Start | FrameKind::Extended)
    }

    /// Consecutive frames prefix their payload with a length byte.
    fn has_length_prefix(&self) -> bool {
        matches!(self, FrameKind::Consecutive)
    }
}

/// 3-bit rolling transaction number (0-7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u8);

impl TransactionId {
    /// Number of distinct transaction ids.
    pub const COUNT: u8 = 8;

    pub fn new(id: u8) -> Result<Self, ProtocolError> {
        if id >= Self::COUNT {
            return Err(ProtocolError::InvalidTransaction(id));
        }
        Ok(Self(id))
    }

    /// Returns the following id, wrapping from 7 to 0.
    pub fn next(self) -> Self {
        Self((self.0 + 1) % Self::COUNT)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Iterates over all ids.
    pub fn all() -> impl Iterator<Item = TransactionId> {
        (0..Self::COUNT).map(TransactionId)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    /// Message-Type flag (bit 4).
    pub message_type: bool,
    pub transaction: TransactionId,
    /// Final flag (bit 0): last frame of its message.
    pub last: bool,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, transaction: TransactionId) -> Self {
        Self {
            kind,
            message_type: false,
            transaction,
            last: false,
        }
    }

    pub fn with_message_type(mut self) -> Self {
        self.message_type = true;
        self
    }

    pub fn with_last(mut self) -> Self {
        self.last = true;
        self
    }

    pub fn to_byte(&self) -> u8 {
        (self.kind.id() << 5)
            | ((self.message_type as u8) << 4)
            | (self.transaction.value() << 1)
            | self.last as u8
    }

    /// Every bit pattern is a valid header.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            kind: FrameKind::from_id(byte >> 5),
            message_type: (byte >> 4) & 0x01 != 0,
            transaction: TransactionId((byte >> 1) & 0x07),
            last: byte & 0x01 != 0,
        }
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    pub fn transaction(&self) -> TransactionId {
        self.header.transaction
    }

    pub fn is_last(&self) -> bool {
        self.header.last
    }

    /// Length of the frame before stuffing.
    pub fn raw_len(&self) -> usize {
        1 + self.header.kind.has_length_prefix() as usize + self.payload.len()
    }

    /// Length of the frame on the wire, including the delimiter.
    pub fn wire_len(&self) -> usize {
        // Raw frames stay below 254 bytes, so stuffing adds exactly one byte.
        self.raw_len() + 1 + 1
    }

    /// Encodes the frame into its stuffed, delimited wire form.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }

        let mut raw = BytesMut::with_capacity(self.raw_len());
        raw.put_u8(self.header.to_byte());
        if self.header.kind.has_length_prefix() {
            raw.put_u8(self.payload.len() as u8);
        }
        raw.put_slice(&self.payload);

        let mut wire = BytesMut::with_capacity(cobs::max_stuffed_len(raw.len()) + 1);
        cobs::stuff(&raw, &mut wire);
        wire.put_u8(FRAME_DELIMITER);
        Ok(wire)
    }

    /// Decodes one wire frame. A single trailing delimiter is optional.
    pub fn decode(wire: &[u8]) -> Result<Self, ProtocolError> {
        let stuffed = match wire.split_last() {
            Some((&FRAME_DELIMITER, rest)) => rest,
            _ => wire,
        };

        let raw = cobs::unstuff(stuffed)?;
        let (&header_byte, body) = raw.split_first().ok_or(ProtocolError::EmptyFrame)?;
        let header = FrameHeader::from_byte(header_byte);

        let payload = if header.kind.has_length_prefix() {
            match body.split_first() {
                Some((&declared, rest)) => {
                    let declared = declared as usize;
                    if declared > rest.len() {
                        return Err(ProtocolError::TruncatedPayload {
                            declared,
                            actual: rest.len(),
                        });
                    }
                    Bytes::copy_from_slice(&rest[..declared])
                }
                None => Bytes::new(),
            }
        } else {
            Bytes::copy_from_slice(body)
        };

        Ok(Self { header, payload })
    }
}
