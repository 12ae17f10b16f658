//! Wire codec for the monitoring server IPC contract
//!
//! This crate implements the server's published protobuf envelope schema
//! directly against the wire format - no code generation. It provides:
//!
//! - `SinkMessage` / `RpcRequest` / `RpcResponse` - the three envelopes
//! - `chunk` - fixed-size payload splitting for size-capped transports
//! - `Reassembler` - the receive-side partial-message table
//!
//! # Design
//!
//! - **Zero-copy**: payloads travel as `bytes::Bytes`; chunking slices the
//!   source buffer instead of copying it
//! - **Bounds-checked**: malformed input returns `CodecError`, never panics
//! - **Forward-compatible**: unknown fields are skipped by wire type
//!
//! Module payloads are opaque at this layer; the codec only stamps
//! identity, routing, and chunking fields around them.

mod chunk;
mod envelope;
mod error;
mod reassembly;
mod wire;

pub use chunk::{chunk_count, chunk_payload, split_rpc_response, split_sink_message};
pub use envelope::{RpcRequest, RpcResponse, SinkMessage, MINION_HEADERS_MODULE};
pub use error::CodecError;
pub use reassembly::{Assembly, Reassembler};

// Re-export bytes for convenience
pub use bytes::Bytes;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Recommended chunk size for brokers with a ~1 MiB message ceiling
pub const DEFAULT_PUBSUB_CHUNK_SIZE: usize = 921_600;

/// How long an incomplete reassembly entry may live before eviction
pub const REASSEMBLY_TTL_SECS: u64 = 60;

/// Upper bound on concurrently reassembling messages
pub const REASSEMBLY_MAX_ENTRIES: usize = 4096;
