//! Envelope messages exchanged with the monitoring server
//!
//! Three messages make up the contract: `SinkMessage` (agent to server
//! telemetry), `RpcRequest` (server to agent) and `RpcResponse` (agent to
//! server). Field numbers are fixed by the server's published schema and
//! must not change.
//!
//! Chunking fields use the server's convention: `current_chunk_number` is
//! 1-based and `total_chunks` counts all chunks of the message. A value of
//! zero on both means the message was never chunked.

use bytes::Bytes;
use uuid::Uuid;

use crate::wire::{as_bytes, as_string, as_u32, as_u64, FieldValue, WireReader, WireWriter};
use crate::Result;

/// Module id carried by the registration header the agent sends after
/// opening an RPC stream
pub const MINION_HEADERS_MODULE: &str = "MINION_HEADERS";

/// Rough per-envelope overhead, used to size encode buffers
const ENVELOPE_OVERHEAD: usize = 128;

/// Telemetry envelope produced by a Sink module and forwarded upstream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkMessage {
    /// Stable id shared by all chunks of one logical message
    pub message_id: String,
    /// Opaque module payload
    pub content: Bytes,
    /// Agent SystemId (stamped by the broker codec)
    pub system_id: String,
    /// Agent Location (stamped by the broker codec)
    pub location: String,
    /// Sink module that produced the payload
    pub module_id: String,
    /// 1-based chunk number, 0 when unchunked
    pub current_chunk_number: u32,
    /// Total chunks of the logical message, 0 when unchunked
    pub total_chunks: u32,
}

impl SinkMessage {
    /// Create an unchunked message for `module_id` with a fresh message id.
    ///
    /// Identity fields are left empty; the broker stamps them on send.
    pub fn new(module_id: impl Into<String>, content: Bytes) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            content,
            module_id: module_id.into(),
            ..Default::default()
        }
    }

    /// Whether this envelope is one chunk of a larger message
    pub fn is_chunked(&self) -> bool {
        self.total_chunks > 1
    }

    /// 0-based index of this chunk
    pub fn chunk_index(&self) -> u32 {
        self.current_chunk_number.saturating_sub(1)
    }

    /// Encode to the server wire format
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(self.content.len() + ENVELOPE_OVERHEAD);
        w.put_string(1, &self.message_id);
        w.put_bytes(2, &self.content);
        w.put_string(3, &self.system_id);
        w.put_string(4, &self.location);
        w.put_string(5, &self.module_id);
        w.put_u32(6, self.current_chunk_number);
        w.put_u32(7, self.total_chunks);
        w.finish()
    }

    /// Decode from the server wire format
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        let mut r = WireReader::new(buf);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => msg.message_id = as_string(field, value)?,
                2 => msg.content = as_bytes(value),
                3 => msg.system_id = as_string(field, value)?,
                4 => msg.location = as_string(field, value)?,
                5 => msg.module_id = as_string(field, value)?,
                6 => msg.current_chunk_number = as_u32(value),
                7 => msg.total_chunks = as_u32(value),
                _ => skip_unknown(field, value),
            }
        }
        Ok(msg)
    }
}

/// On-demand operation the server asks this agent to run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcRequest {
    /// Correlation id, echoed back on the response
    pub rpc_id: String,
    /// Opaque module payload
    pub content: Bytes,
    /// SystemId the server addressed (may be empty for any agent at the location)
    pub system_id: String,
    /// Location this request was routed to
    pub location: String,
    /// RPC module expected to execute the request
    pub module_id: String,
    /// Absolute deadline, epoch milliseconds; 0 means no deadline
    pub expiration_time: u64,
    /// 1-based chunk number, 0 when unchunked
    pub current_chunk_number: u32,
    /// Total chunks of the logical message, 0 when unchunked
    pub total_chunks: u32,
}

impl RpcRequest {
    /// Whether this envelope is one chunk of a larger message
    pub fn is_chunked(&self) -> bool {
        self.total_chunks > 1
    }

    /// 0-based index of this chunk
    pub fn chunk_index(&self) -> u32 {
        self.current_chunk_number.saturating_sub(1)
    }

    /// Whether the deadline has passed at `now_ms` (epoch milliseconds)
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expiration_time != 0 && self.expiration_time < now_ms
    }

    /// Encode to the server wire format
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(self.content.len() + ENVELOPE_OVERHEAD);
        w.put_string(1, &self.rpc_id);
        w.put_bytes(2, &self.content);
        w.put_string(3, &self.system_id);
        w.put_string(4, &self.location);
        w.put_string(5, &self.module_id);
        w.put_u64(6, self.expiration_time);
        w.put_u32(7, self.current_chunk_number);
        w.put_u32(8, self.total_chunks);
        w.finish()
    }

    /// Decode from the server wire format
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        let mut r = WireReader::new(buf);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => msg.rpc_id = as_string(field, value)?,
                2 => msg.content = as_bytes(value),
                3 => msg.system_id = as_string(field, value)?,
                4 => msg.location = as_string(field, value)?,
                5 => msg.module_id = as_string(field, value)?,
                6 => msg.expiration_time = as_u64(value),
                7 => msg.current_chunk_number = as_u32(value),
                8 => msg.total_chunks = as_u32(value),
                _ => skip_unknown(field, value),
            }
        }
        Ok(msg)
    }
}

/// Reply to an `RpcRequest`, correlated by `rpc_id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcResponse {
    /// Correlation id copied from the request
    pub rpc_id: String,
    /// Opaque module payload
    pub content: Bytes,
    /// Agent SystemId
    pub system_id: String,
    /// Agent Location
    pub location: String,
    /// RPC module that produced the reply
    pub module_id: String,
    /// Error description when the module failed; empty on success
    pub error: String,
    /// 1-based chunk number, 0 when unchunked
    pub current_chunk_number: u32,
    /// Total chunks of the logical message, 0 when unchunked
    pub total_chunks: u32,
}

impl RpcResponse {
    /// Build the reply skeleton for a request (identity stamped by the broker)
    pub fn for_request(request: &RpcRequest, content: Bytes) -> Self {
        Self {
            rpc_id: request.rpc_id.clone(),
            content,
            module_id: request.module_id.clone(),
            ..Default::default()
        }
    }

    /// Build the registration header announcing this agent's identity.
    ///
    /// Sent with an empty `rpc_id` on every (re)initialized RPC stream so
    /// the server subscribes the agent to requests for its location.
    pub fn minion_header(system_id: &str, location: &str) -> Self {
        Self {
            system_id: system_id.to_owned(),
            location: location.to_owned(),
            module_id: MINION_HEADERS_MODULE.to_owned(),
            ..Default::default()
        }
    }

    /// Whether this envelope is one chunk of a larger message
    pub fn is_chunked(&self) -> bool {
        self.total_chunks > 1
    }

    /// Encode to the server wire format
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::with_capacity(self.content.len() + ENVELOPE_OVERHEAD);
        w.put_string(1, &self.rpc_id);
        w.put_bytes(2, &self.content);
        w.put_string(3, &self.system_id);
        w.put_string(4, &self.location);
        w.put_string(5, &self.module_id);
        w.put_string(6, &self.error);
        w.put_u32(7, self.current_chunk_number);
        w.put_u32(8, self.total_chunks);
        w.finish()
    }

    /// Decode from the server wire format
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut msg = Self::default();
        let mut r = WireReader::new(buf);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => msg.rpc_id = as_string(field, value)?,
                2 => msg.content = as_bytes(value),
                3 => msg.system_id = as_string(field, value)?,
                4 => msg.location = as_string(field, value)?,
                5 => msg.module_id = as_string(field, value)?,
                6 => msg.error = as_string(field, value)?,
                7 => msg.current_chunk_number = as_u32(value),
                8 => msg.total_chunks = as_u32(value),
                _ => skip_unknown(field, value),
            }
        }
        Ok(msg)
    }
}

/// Unknown fields are legal; newer servers may add them
fn skip_unknown(field: u32, _value: FieldValue<'_>) {
    tracing::trace!(field, "skipping unknown envelope field");
}
