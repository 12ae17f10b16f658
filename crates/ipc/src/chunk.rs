//! Payload chunking for size-capped transports
//!
//! Both transports have per-message ceilings, so payloads larger than the
//! configured chunk size are split into multiple envelopes that share a
//! message id. Chunks are zero-copy slices of the source payload.

use bytes::Bytes;

use crate::envelope::{RpcResponse, SinkMessage};

/// Number of chunks a payload of `len` bytes needs at `chunk_size`
///
/// An empty payload still occupies one chunk so the receiver sees a
/// complete message.
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    debug_assert!(chunk_size > 0);
    (len.div_ceil(chunk_size).max(1)) as u32
}

/// Split a payload into `chunk_count` slices of at most `chunk_size` bytes
pub fn chunk_payload(payload: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let total = chunk_count(payload.len(), chunk_size) as usize;
    let mut chunks = Vec::with_capacity(total);
    for i in 0..total {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(payload.len());
        chunks.push(payload.slice(start..end));
    }
    chunks
}

/// Split a sink message into per-chunk envelopes.
///
/// A payload that fits in one chunk is returned unmodified, preserving the
/// single-chunk fast path on the receive side.
pub fn split_sink_message(msg: SinkMessage, chunk_size: usize) -> Vec<SinkMessage> {
    if msg.content.len() <= chunk_size {
        return vec![msg];
    }
    let chunks = chunk_payload(&msg.content, chunk_size);
    let total = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, content)| SinkMessage {
            content,
            current_chunk_number: i as u32 + 1,
            total_chunks: total,
            ..msg.clone()
        })
        .collect()
}

/// Split an RPC response into per-chunk envelopes keyed by its rpc id
pub fn split_rpc_response(res: RpcResponse, chunk_size: usize) -> Vec<RpcResponse> {
    if res.content.len() <= chunk_size {
        return vec![res];
    }
    let chunks = chunk_payload(&res.content, chunk_size);
    let total = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, content)| RpcResponse {
            content,
            current_chunk_number: i as u32 + 1,
            total_chunks: total,
            ..res.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_PUBSUB_CHUNK_SIZE;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 10), 1);
        assert_eq!(chunk_count(1, 10), 1);
        assert_eq!(chunk_count(10, 10), 1);
        assert_eq!(chunk_count(11, 10), 2);
        assert_eq!(chunk_count(2_500_000, DEFAULT_PUBSUB_CHUNK_SIZE), 3);
    }

    #[test]
    fn test_large_payload_splits_at_default_size() {
        // 2,500,000 bytes at the default pubsub chunk size: 921600 + 921600 + 656800
        let payload = Bytes::from(vec![0xa5u8; 2_500_000]);
        let chunks = chunk_payload(&payload, DEFAULT_PUBSUB_CHUNK_SIZE);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 921_600);
        assert_eq!(chunks[1].len(), 921_600);
        assert_eq!(chunks[2].len(), 656_800);

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_split_sink_message_numbers_chunks() {
        let msg = SinkMessage::new("Netflow-5", Bytes::from(vec![1u8; 2_500_000]));
        let id = msg.message_id.clone();
        let parts = split_sink_message(msg, DEFAULT_PUBSUB_CHUNK_SIZE);
        assert_eq!(parts.len(), 3);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.message_id, id);
            assert_eq!(part.total_chunks, 3);
            assert_eq!(part.current_chunk_number, i as u32 + 1);
        }
        // Final chunk carries current == total
        assert_eq!(parts[2].current_chunk_number, parts[2].total_chunks);
    }

    #[test]
    fn test_small_message_bypasses_chunking() {
        let msg = SinkMessage::new("Heartbeat", Bytes::from_static(b"beat"));
        let parts = split_sink_message(msg.clone(), DEFAULT_PUBSUB_CHUNK_SIZE);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], msg);
        assert_eq!(parts[0].total_chunks, 0);
    }

    #[test]
    fn test_split_rpc_response() {
        let res = RpcResponse {
            rpc_id: "r1".into(),
            content: Bytes::from(vec![7u8; 25]),
            ..Default::default()
        };
        let parts = split_rpc_response(res, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].content.len(), 10);
        assert_eq!(parts[2].content.len(), 5);
        assert!(parts.iter().all(|p| p.rpc_id == "r1" && p.total_chunks == 3));
    }
}
