//! Encoder and decoder for wire frames.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameHeader, FrameKind, TransactionId};
use crate::{FRAME_DELIMITER, MAX_FRAME_PAYLOAD};
use bytes::{Buf, Bytes, BytesMut};

/// Default bound on bytes buffered without seeing a delimiter.
pub const DEFAULT_MAX_BUFFERED: usize = 1024;

/// Per-frame overhead of a start frame on the wire: header, COBS code, delimiter.
const START_OVERHEAD: usize = 3;
/// Consecutive frames also carry a length byte.
const CONSECUTIVE_OVERHEAD: usize = 4;

/// Splits message bodies into frames that fit the transport MTU.
pub struct Encoder;

impl Encoder {
    /// Splits `body` into one start frame followed by consecutive frames.
    ///
    /// Every frame is at most `mtu` bytes on the wire. The Final flag is set
    /// on the last frame only; an empty body yields a single empty frame.
    pub fn split_message(
        transaction: TransactionId,
        message_type: bool,
        body: &[u8],
        mtu: usize,
    ) -> Result<Vec<Frame>, ProtocolError> {
        if mtu <= CONSECUTIVE_OVERHEAD {
            return Err(ProtocolError::MtuTooSmall(mtu));
        }
        let start_cap = (mtu - START_OVERHEAD).min(MAX_FRAME_PAYLOAD);
        let next_cap = (mtu - CONSECUTIVE_OVERHEAD).min(MAX_FRAME_PAYLOAD);

        let header = |kind| {
            let mut header = FrameHeader::new(kind, transaction);
            header.message_type = message_type;
            header
        };

        let mut frames = Vec::with_capacity(1 + body.len().saturating_sub(start_cap) / next_cap);
        let (first, mut rest) = body.split_at(body.len().min(start_cap));
        frames.push(Frame::new(
            header(FrameKind::Start),
            Bytes::copy_from_slice(first),
        ));

        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(next_cap));
            frames.push(Frame::new(
                header(FrameKind::Consecutive),
                Bytes::copy_from_slice(chunk),
            ));
            rest = tail;
        }

        if let Some(last) = frames.last_mut() {
            last.header.last = true;
        }
        Ok(frames)
    }

    /// Splits and encodes `body` into wire-ready buffers, one per transport write.
    pub fn encode_message(
        transaction: TransactionId,
        message_type: bool,
        body: &[u8],
        mtu: usize,
    ) -> Result<Vec<BytesMut>, ProtocolError> {
        Self::split_message(transaction, message_type, body, mtu)?
            .iter()
            .map(Frame::encode)
            .collect()
    }
}

/// Splits a notification byte stream into frames.
///
/// Notifications may carry part of a frame or several frames; bytes are
/// buffered until a delimiter arrives. Each delimited chunk decodes
/// independently, so one malformed frame does not affect its neighbours.
pub struct Decoder {
    buffer: BytesMut,
    max_buffered: usize,
    overflow: Option<ProtocolError>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            max_buffered,
            overflow: None,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > self.max_buffered && !self.buffer.contains(&FRAME_DELIMITER) {
            self.overflow = Some(ProtocolError::Overflow {
                buffered: self.buffer.len(),
            });
            self.buffer.clear();
        }
    }

    /// Returns the next decoded frame, or `None` when no complete frame is buffered.
    pub fn decode_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        if let Some(err) = self.overflow.take() {
            return Some(Err(err));
        }

        loop {
            let end = self.buffer.iter().position(|&b| b == FRAME_DELIMITER)?;
            let chunk = self.buffer.split_to(end);
            self.buffer.advance(1);

            // Back-to-back delimiters carry no frame.
            if chunk.is_empty() {
                continue;
            }
            return Some(Frame::decode(&chunk));
        }
    }

    /// Returns the number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflow = None;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
