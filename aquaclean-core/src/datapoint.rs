//! Data point descriptors and value encodings.
//!
//! Every device setting or sensor is a numbered data point. A descriptor
//! fixes its direction and how its value is laid out on the wire; all
//! multi-byte integers are little-endian.

use crate::error::{DecodeError, ValidationError};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric data point identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPointId(pub u16);

impl DataPointId {
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl From<u16> for DataPointId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for DataPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which operations a data point accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
    ReadWrite,
}

impl Direction {
    pub fn is_readable(&self) -> bool {
        matches!(self, Direction::Read | Direction::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Direction::Write | Direction::ReadWrite)
    }
}

fn default_width() -> u8 {
    1
}

/// Wire encoding of a data point value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    /// One byte, non-zero is true.
    Boolean,
    /// One byte, 0..=100.
    Percent,
    /// Unsigned integer of 1, 2 or 4 bytes.
    Unsigned {
        #[serde(default = "default_width")]
        width: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// Two's complement integer of 1, 2 or 4 bytes.
    Signed {
        #[serde(default = "default_width")]
        width: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// One byte indexing into `variants`.
    Enumerated { variants: Vec<String> },
    /// Red, green, blue bytes.
    Rgb,
    /// Seconds since the Unix epoch as u32.
    Timestamp,
    /// UTF-8 text, trailing NULs stripped on decode.
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_len: Option<usize>,
    },
}

impl Encoding {
    /// Short name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Encoding::Boolean => "boolean",
            Encoding::Percent => "percent",
            Encoding::Unsigned { .. } => "unsigned",
            Encoding::Signed { .. } => "signed",
            Encoding::Enumerated { .. } => "enumerated",
            Encoding::Rgb => "rgb",
            Encoding::Timestamp => "timestamp",
            Encoding::Text { .. } => "text",
        }
    }

    /// Checks the encoding is internally consistent.
    pub(crate) fn check(&self) -> Result<(), String> {
        match self {
            Encoding::Unsigned { width, min, max } | Encoding::Signed { width, min, max } => {
                if !matches!(width, 1 | 2 | 4) {
                    return Err(format!("width must be 1, 2 or 4, got {}", width));
                }
                let (lo, hi) = self.bounds();
                let (type_lo, type_hi) = self.type_bounds();
                if lo > hi {
                    return Err(format!("min {} greater than max {}", lo, hi));
                }
                if min.map_or(false, |m| m < type_lo) || max.map_or(false, |m| m > type_hi) {
                    return Err(format!("bounds exceed {}-byte {}", width, self.type_name()));
                }
                Ok(())
            }
            Encoding::Enumerated { variants } => {
                if variants.is_empty() {
                    return Err("enumeration has no variants".to_string());
                }
                if variants.len() > 256 {
                    return Err(format!("enumeration has {} variants", variants.len()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn type_bounds(&self) -> (i64, i64) {
        match self {
            Encoding::Unsigned { width, .. } => (0, (1i64 << (8 * *width as u32)) - 1),
            Encoding::Signed { width, .. } => {
                let half = 1i64 << (8 * *width as u32 - 1);
                (-half, half - 1)
            }
            Encoding::Percent => (0, 100),
            Encoding::Enumerated { variants } => (0, variants.len() as i64 - 1),
            _ => (i64::MIN, i64::MAX),
        }
    }

    /// Inclusive value bounds for numeric encodings.
    pub fn bounds(&self) -> (i64, i64) {
        let (type_lo, type_hi) = self.type_bounds();
        match self {
            Encoding::Unsigned { min, max, .. } | Encoding::Signed { min, max, .. } => {
                (min.unwrap_or(type_lo), max.unwrap_or(type_hi))
            }
            _ => (type_lo, type_hi),
        }
    }
}

/// An RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// A typed data point value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataPointValue {
    Bool(bool),
    Percent(u8),
    Unsigned(u32),
    Signed(i32),
    Enum(u8),
    Rgb(Rgb),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl DataPointValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataPointValue::Bool(_) => "boolean",
            DataPointValue::Percent(_) => "percent",
            DataPointValue::Unsigned(_) => "unsigned",
            DataPointValue::Signed(_) => "signed",
            DataPointValue::Enum(_) => "enumerated",
            DataPointValue::Rgb(_) => "rgb",
            DataPointValue::Timestamp(_) => "timestamp",
            DataPointValue::Text(_) => "text",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataPointValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as an integer, for numeric variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataPointValue::Bool(b) => Some(*b as i64),
            DataPointValue::Percent(v) | DataPointValue::Enum(v) => Some(*v as i64),
            DataPointValue::Unsigned(v) => Some(*v as i64),
            DataPointValue::Signed(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataPointValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for DataPointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataPointValue::Bool(b) => write!(f, "{}", b),
            DataPointValue::Percent(v) => write!(f, "{}%", v),
            DataPointValue::Unsigned(v) => write!(f, "{}", v),
            DataPointValue::Signed(v) => write!(f, "{}", v),
            DataPointValue::Enum(v) => write!(f, "#{}", v),
            DataPointValue::Rgb(c) => write!(f, "#{:02x}{:02x}{:02x}", c.red, c.green, c.blue),
            DataPointValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            DataPointValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Static description of one data point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPointSpec {
    pub id: DataPointId,
    pub name: String,
    pub direction: Direction,
    pub encoding: Encoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl DataPointSpec {
    /// Validates `value` and encodes it for a write request.
    pub fn encode(&self, value: &DataPointValue) -> Result<Bytes, ValidationError> {
        if !self.direction.is_writable() {
            return Err(ValidationError::NotWritable { id: self.id });
        }

        let mut buf = BytesMut::with_capacity(4);
        match (&self.encoding, value) {
            (Encoding::Boolean, DataPointValue::Bool(b)) => buf.put_u8(*b as u8),
            (Encoding::Percent, DataPointValue::Percent(v))
            | (Encoding::Enumerated { .. }, DataPointValue::Enum(v)) => {
                self.check_range(*v as i64)?;
                buf.put_u8(*v);
            }
            (Encoding::Unsigned { width, .. }, DataPointValue::Unsigned(v)) => {
                self.check_range(*v as i64)?;
                put_int(&mut buf, *v as i64, *width);
            }
            (Encoding::Signed { width, .. }, DataPointValue::Signed(v)) => {
                self.check_range(*v as i64)?;
                put_int(&mut buf, *v as i64, *width);
            }
            (Encoding::Rgb, DataPointValue::Rgb(c)) => {
                buf.put_slice(&[c.red, c.green, c.blue]);
            }
            (Encoding::Timestamp, DataPointValue::Timestamp(t)) => {
                let secs = t.timestamp();
                if !(0..=u32::MAX as i64).contains(&secs) {
                    return Err(ValidationError::OutOfRange {
                        id: self.id,
                        value: secs,
                        min: 0,
                        max: u32::MAX as i64,
                    });
                }
                buf.put_u32_le(secs as u32);
            }
            (Encoding::Text { max_len }, DataPointValue::Text(s)) => {
                if let Some(max) = max_len {
                    if s.len() > *max {
                        return Err(ValidationError::TextTooLong {
                            id: self.id,
                            len: s.len(),
                            max: *max,
                        });
                    }
                }
                buf.put_slice(s.as_bytes());
            }
            (encoding, value) => {
                return Err(ValidationError::TypeMismatch {
                    id: self.id,
                    expected: encoding.type_name(),
                    actual: value.type_name(),
                })
            }
        }
        Ok(buf.freeze())
    }

    /// Decodes a reported value. An empty payload means no data.
    pub fn decode(&self, payload: &[u8]) -> Result<Option<DataPointValue>, DecodeError> {
        if payload.is_empty() {
            return Ok(None);
        }

        let value = match &self.encoding {
            Encoding::Boolean => DataPointValue::Bool(self.take(payload, 1)?[0] != 0),
            Encoding::Percent => {
                let v = self.take(payload, 1)?[0];
                self.check_decoded(v as i64)?;
                DataPointValue::Percent(v)
            }
            Encoding::Enumerated { .. } => {
                let v = self.take(payload, 1)?[0];
                self.check_decoded(v as i64)?;
                DataPointValue::Enum(v)
            }
            Encoding::Unsigned { width, .. } => {
                let v = get_unsigned(self.take(payload, *width as usize)?);
                DataPointValue::Unsigned(v as u32)
            }
            Encoding::Signed { width, .. } => {
                let raw = get_unsigned(self.take(payload, *width as usize)?);
                let shift = 64 - 8 * *width as u32;
                DataPointValue::Signed((((raw as i64) << shift) >> shift) as i32)
            }
            Encoding::Rgb => {
                let b = self.take(payload, 3)?;
                DataPointValue::Rgb(Rgb::new(b[0], b[1], b[2]))
            }
            Encoding::Timestamp => {
                let secs = get_unsigned(self.take(payload, 4)?) as i64;
                let t = DateTime::<Utc>::from_timestamp(secs, 0).ok_or(
                    DecodeError::InvalidValue {
                        id: self.id,
                        value: secs,
                    },
                )?;
                DataPointValue::Timestamp(t)
            }
            Encoding::Text { .. } => {
                let end = payload
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |pos| pos + 1);
                let s = std::str::from_utf8(&payload[..end])
                    .map_err(|_| DecodeError::InvalidUtf8 { id: self.id })?;
                DataPointValue::Text(s.to_string())
            }
        };
        Ok(Some(value))
    }

    /// Returns the name of an enumerated value, if this data point has one.
    pub fn variant_name(&self, value: &DataPointValue) -> Option<&str> {
        match (&self.encoding, value) {
            (Encoding::Enumerated { variants }, DataPointValue::Enum(v)) => {
                variants.get(*v as usize).map(String::as_str)
            }
            _ => None,
        }
    }

    fn check_range(&self, value: i64) -> Result<(), ValidationError> {
        let (min, max) = self.encoding.bounds();
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                id: self.id,
                value,
                min,
                max,
            });
        }
        Ok(())
    }

    fn check_decoded(&self, value: i64) -> Result<(), DecodeError> {
        let (min, max) = self.encoding.bounds();
        if value < min || value > max {
            return Err(DecodeError::InvalidValue { id: self.id, value });
        }
        Ok(())
    }

    fn take<'a>(&self, payload: &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
        // Devices may pad reports; extra bytes are ignored.
        payload.get(..len).ok_or(DecodeError::Truncated {
            id: self.id,
            expected: len,
            actual: payload.len(),
        })
    }
}

fn put_int(buf: &mut BytesMut, value: i64, width: u8) {
    buf.put_slice(&value.to_le_bytes()[..width as usize]);
}

fn get_unsigned(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
