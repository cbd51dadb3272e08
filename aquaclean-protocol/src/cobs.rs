//! Consistent Overhead Byte Stuffing.
//!
//! Removes every `0x00` from a buffer so that `0x00` can delimit frames on
//! the wire. Each block starts with a code byte `n` followed by `n - 1`
//! non-zero bytes; a code below `0xFF` implies a zero after the block unless
//! it is the last one. Overhead is one byte per 254 bytes of input.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

const MAX_CODE: u8 = 0xFF;

/// Returns the worst-case stuffed length for `len` input bytes.
pub const fn max_stuffed_len(len: usize) -> usize {
    len + len / 254 + 1
}

/// Appends the stuffed form of `data` to `out` (no delimiter).
pub fn stuff(data: &[u8], out: &mut BytesMut) {
    out.reserve(max_stuffed_len(data.len()));

    let mut code_idx = out.len();
    out.put_u8(0);
    let mut code: u8 = 1;

    for &byte in data {
        if byte == 0 {
            out[code_idx] = code;
            code_idx = out.len();
            out.put_u8(0);
            code = 1;
        } else {
            out.put_u8(byte);
            code += 1;
            if code == MAX_CODE {
                out[code_idx] = code;
                code_idx = out.len();
                out.put_u8(0);
                code = 1;
            }
        }
    }

    out[code_idx] = code;
}

/// Reverses [`stuff`]. `data` must not include the trailing delimiter.
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == 0 {
            return Err(ProtocolError::UnexpectedDelimiter { offset: i });
        }
        i += 1;

        let run = code as usize - 1;
        if i + run > data.len() {
            return Err(ProtocolError::MalformedStuffing { offset: i - 1 });
        }
        let block = &data[i..i + run];
        if let Some(pos) = block.iter().position(|&b| b == 0) {
            return Err(ProtocolError::UnexpectedDelimiter { offset: i + pos });
        }
        out.extend_from_slice(block);
        i += run;

        if code != MAX_CODE && i < data.len() {
            out.push(0);
        }
    }

    Ok(out)
}
