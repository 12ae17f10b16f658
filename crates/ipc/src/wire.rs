//! Protobuf wire format primitives
//!
//! Direct encoding and decoding of the protobuf binary format, sufficient
//! for the three envelope messages this agent exchanges with the server.
//!
//! # Wire Format
//!
//! Every field is a tag followed by a value:
//! ```text
//! tag = (field_number << 3) | wire_type     (varint)
//!
//! wire_type 0: varint        (u64, LEB128)
//! wire_type 1: fixed 64-bit  (8 bytes, little-endian)
//! wire_type 2: length-delim  (varint length, then bytes)
//! wire_type 5: fixed 32-bit  (4 bytes, little-endian)
//! ```
//!
//! Fields with default values (empty string/bytes, zero integer) are
//! omitted on encode, matching proto3 emitters. Unknown fields are
//! consumed by wire type and ignored on decode.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::Result;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Maximum encoded length of a varint
const MAX_VARINT_BYTES: usize = 10;

// =============================================================================
// Decoding
// =============================================================================

/// A decoded field value, borrowing length-delimited data from the input
#[derive(Debug, Clone, Copy)]
pub(crate) enum FieldValue<'a> {
    /// wire type 0
    Varint(u64),
    /// wire type 2
    Bytes(&'a [u8]),
    /// wire types 1 and 5, kept only so unknown fields can be skipped
    Fixed,
}

/// Cursor over an encoded message
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Read the next (field number, value) pair, or `None` at end of input
    pub(crate) fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }

        let tag = self.read_varint("field tag")?;
        let field = (tag >> 3) as u32;
        let wire_type = (tag & 0x07) as u8;

        let value = match wire_type {
            WIRE_VARINT => FieldValue::Varint(self.read_varint("varint field")?),
            WIRE_LEN => {
                let len = self.read_varint("field length")? as usize;
                let end = self.pos.checked_add(len).filter(|&e| e <= self.buf.len());
                let Some(end) = end else {
                    return Err(CodecError::Truncated {
                        context: "length-delimited field",
                    });
                };
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                FieldValue::Bytes(slice)
            }
            WIRE_FIXED64 => {
                self.skip(8, "fixed64 field")?;
                FieldValue::Fixed
            }
            WIRE_FIXED32 => {
                self.skip(4, "fixed32 field")?;
                FieldValue::Fixed
            }
            other => {
                return Err(CodecError::UnsupportedWireType {
                    field,
                    wire_type: other,
                })
            }
        };

        Ok(Some((field, value)))
    }

    fn read_varint(&mut self, context: &'static str) -> Result<u64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(CodecError::Truncated { context });
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::MalformedVarint { context })
    }

    fn skip(&mut self, n: usize, context: &'static str) -> Result<()> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        match end {
            Some(end) => {
                self.pos = end;
                Ok(())
            }
            None => Err(CodecError::Truncated { context }),
        }
    }
}

/// Interpret a field value as UTF-8 text
pub(crate) fn as_string(field: u32, value: FieldValue<'_>) -> Result<String> {
    match value {
        FieldValue::Bytes(b) => std::str::from_utf8(b)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field }),
        _ => Ok(String::new()),
    }
}

/// Interpret a field value as opaque bytes (copied out of the input)
pub(crate) fn as_bytes(value: FieldValue<'_>) -> Bytes {
    match value {
        FieldValue::Bytes(b) => Bytes::copy_from_slice(b),
        _ => Bytes::new(),
    }
}

/// Interpret a field value as an unsigned varint
pub(crate) fn as_u64(value: FieldValue<'_>) -> u64 {
    match value {
        FieldValue::Varint(v) => v,
        _ => 0,
    }
}

/// Interpret a field value as an int32 (negatives are sign-extended varints)
pub(crate) fn as_u32(value: FieldValue<'_>) -> u32 {
    as_u64(value) as u32
}

// =============================================================================
// Encoding
// =============================================================================

/// Append-only encoder for one message
pub(crate) struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub(crate) fn put_string(&mut self, field: u32, value: &str) {
        if !value.is_empty() {
            self.put_len_delimited(field, value.as_bytes());
        }
    }

    pub(crate) fn put_bytes(&mut self, field: u32, value: &[u8]) {
        if !value.is_empty() {
            self.put_len_delimited(field, value);
        }
    }

    pub(crate) fn put_u64(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.put_tag(field, WIRE_VARINT);
            self.put_varint(value);
        }
    }

    pub(crate) fn put_u32(&mut self, field: u32, value: u32) {
        self.put_u64(field, u64::from(value));
    }

    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    fn put_len_delimited(&mut self, field: u32, value: &[u8]) {
        self.put_tag(field, WIRE_LEN);
        self.put_varint(value.len() as u64);
        self.buf.put_slice(value);
    }

    fn put_tag(&mut self, field: u32, wire_type: u8) {
        self.put_varint(u64::from(field) << 3 | u64::from(wire_type));
    }

    fn put_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.put_u8(byte);
                break;
            }
            self.buf.put_u8(byte | 0x80);
        }
    }
}
