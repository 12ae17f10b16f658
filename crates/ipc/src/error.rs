//! Codec error types

use thiserror::Error;

/// Errors produced while encoding or decoding envelopes
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input ended in the middle of a varint or field payload
    #[error("truncated message while reading {context}")]
    Truncated {
        /// What was being read when the buffer ran out
        context: &'static str,
    },

    /// Varint longer than 10 bytes (not a valid protobuf varint)
    #[error("malformed varint while reading {context}")]
    MalformedVarint {
        /// What was being read
        context: &'static str,
    },

    /// A wire type this codec does not understand
    #[error("field {field} has unsupported wire type {wire_type}")]
    UnsupportedWireType {
        /// Field number from the tag
        field: u32,
        /// Raw wire type bits
        wire_type: u8,
    },

    /// A string field that is not valid UTF-8
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Offending field number
        field: u32,
    },

    /// Chunk metadata disagrees with an existing reassembly entry
    #[error("chunk for message {message_id} declares {declared} total chunks, entry has {existing}")]
    ChunkTotalMismatch {
        /// Message id of the entry
        message_id: String,
        /// Total chunks declared by the incoming chunk
        declared: u32,
        /// Total chunks recorded on first arrival
        existing: u32,
    },

    /// Chunk index at or beyond the declared total
    #[error("chunk index {index} out of range for {total} total chunks")]
    ChunkOutOfRange {
        /// 0-based chunk index
        index: u32,
        /// Declared total chunks
        total: u32,
    },
}
