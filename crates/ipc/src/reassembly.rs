//! Receive-side reassembly of chunked messages
//!
//! The reassembler keeps one entry per in-flight message id. Chunks may
//! arrive in any order; when every index is present the payload is handed
//! back and the entry removed. Entries that never complete are evicted by
//! the periodic sweep, and the table is bounded so a pathological sender
//! cannot grow it without limit.
//!
//! The table is owned by a single consumer task per transport, so it needs
//! no internal locking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::{Result, REASSEMBLY_MAX_ENTRIES, REASSEMBLY_TTL_SECS};

/// Outcome of feeding one chunk into the table
#[derive(Debug)]
pub enum Assembly {
    /// All chunks arrived; the reassembled payload
    Complete(Bytes),
    /// More chunks outstanding
    Pending,
}

struct Partial {
    chunks: Vec<Option<Bytes>>,
    received: u32,
    total: u32,
    first_seen: Instant,
}

/// Bounded table of partially received messages
pub struct Reassembler {
    entries: HashMap<String, Partial>,
    max_entries: usize,
    ttl: Duration,
    dropped: u64,
}

impl Reassembler {
    /// Create a table with the standard TTL and size bound
    pub fn new() -> Self {
        Self::with_limits(REASSEMBLY_MAX_ENTRIES, Duration::from_secs(REASSEMBLY_TTL_SECS))
    }

    /// Create a table with explicit limits
    pub fn with_limits(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
            dropped: 0,
        }
    }

    /// Feed one chunk.
    ///
    /// `index` is 0-based; `total` is the declared chunk count. Messages
    /// with `total <= 1` bypass the table entirely.
    pub fn accept(
        &mut self,
        message_id: &str,
        index: u32,
        total: u32,
        data: Bytes,
    ) -> Result<Assembly> {
        if total <= 1 {
            return Ok(Assembly::Complete(data));
        }
        if index >= total {
            return Err(CodecError::ChunkOutOfRange { index, total });
        }

        if !self.entries.contains_key(message_id) {
            self.reserve_slot();
        }
        let entry = self
            .entries
            .entry(message_id.to_owned())
            .or_insert_with(|| Partial {
                chunks: vec![None; total as usize],
                received: 0,
                total,
                first_seen: Instant::now(),
            });

        if entry.total != total {
            let existing = entry.total;
            self.entries.remove(message_id);
            self.dropped += 1;
            return Err(CodecError::ChunkTotalMismatch {
                message_id: message_id.to_owned(),
                declared: total,
                existing,
            });
        }

        if entry.chunks[index as usize].replace(data).is_none() {
            entry.received += 1;
        }

        if entry.received < entry.total {
            return Ok(Assembly::Pending);
        }

        let Some(entry) = self.entries.remove(message_id) else {
            return Ok(Assembly::Pending);
        };
        let len = entry
            .chunks
            .iter()
            .map(|c| c.as_ref().map_or(0, Bytes::len))
            .sum();
        let mut payload = BytesMut::with_capacity(len);
        for chunk in entry.chunks.into_iter().flatten() {
            payload.put_slice(&chunk);
        }
        Ok(Assembly::Complete(payload.freeze()))
    }

    /// Evict entries older than the TTL, returning how many were dropped
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict entries whose age at `now` exceeds the TTL
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|id, partial| {
                let keep = now.duration_since(partial.first_seen) <= ttl;
                if !keep {
                    tracing::debug!(
                        message_id = %id,
                        received = partial.received,
                        total = partial.total,
                        "evicting stale reassembly entry"
                    );
                }
                keep
            });
        let evicted = before - self.entries.len();
        self.dropped += evicted as u64;
        evicted
    }

    /// Total messages dropped (eviction and overflow) since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Number of in-flight entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no in-flight entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make room for one more entry, dropping the oldest when at capacity
    fn reserve_slot(&mut self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, p)| p.first_seen)
            .map(|(id, _)| id.clone())
        {
            tracing::warn!(message_id = %oldest, "reassembly table full, dropping oldest entry");
            self.entries.remove(&oldest);
            self.dropped += 1;
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(byte: u8, len: usize) -> Bytes {
        Bytes::from(vec![byte; len])
    }

    #[test]
    fn test_single_chunk_bypasses_table() {
        let mut table = Reassembler::new();
        let data = Bytes::from_static(b"whole");
        match table.accept("m1", 0, 1, data.clone()).unwrap() {
            Assembly::Complete(payload) => assert_eq!(payload, data),
            Assembly::Pending => panic!("single chunk must complete immediately"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_in_order_reassembly() {
        let mut table = Reassembler::new();
        assert!(matches!(
            table.accept("m1", 0, 3, chunk(b'a', 4)).unwrap(),
            Assembly::Pending
        ));
        assert!(matches!(
            table.accept("m1", 1, 3, chunk(b'b', 4)).unwrap(),
            Assembly::Pending
        ));
        let Assembly::Complete(payload) = table.accept("m1", 2, 3, chunk(b'c', 2)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(&payload[..], b"aaaabbbbcc");
        assert!(table.is_empty());
    }

    #[test]
    fn test_out_of_order_yields_same_payload() {
        let mut table = Reassembler::new();
        table.accept("m1", 2, 3, chunk(b'c', 2)).unwrap();
        table.accept("m1", 0, 3, chunk(b'a', 4)).unwrap();
        let Assembly::Complete(payload) = table.accept("m1", 1, 3, chunk(b'b', 4)).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(&payload[..], b"aaaabbbbcc");
    }

    #[test]
    fn test_interleaved_messages() {
        let mut table = Reassembler::new();
        table.accept("m1", 0, 2, chunk(b'1', 1)).unwrap();
        table.accept("m2", 0, 2, chunk(b'x', 1)).unwrap();
        let Assembly::Complete(first) = table.accept("m2", 1, 2, chunk(b'y', 1)).unwrap() else {
            panic!("expected m2 completion");
        };
        assert_eq!(&first[..], b"xy");
        let Assembly::Complete(second) = table.accept("m1", 1, 2, chunk(b'2', 1)).unwrap() else {
            panic!("expected m1 completion");
        };
        assert_eq!(&second[..], b"12");
    }

    #[test]
    fn test_duplicate_chunk_does_not_complete_early() {
        let mut table = Reassembler::new();
        table.accept("m1", 0, 2, chunk(b'a', 1)).unwrap();
        assert!(matches!(
            table.accept("m1", 0, 2, chunk(b'a', 1)).unwrap(),
            Assembly::Pending
        ));
        assert!(matches!(
            table.accept("m1", 1, 2, chunk(b'b', 1)).unwrap(),
            Assembly::Complete(_)
        ));
    }

    #[test]
    fn test_stale_entry_evicted_and_counted_once() {
        let mut table = Reassembler::with_limits(16, Duration::from_secs(60));
        table.accept("m1", 0, 3, chunk(b'a', 1)).unwrap();

        // Not yet stale
        assert_eq!(table.sweep_at(Instant::now() + Duration::from_secs(59)), 0);
        assert_eq!(table.dropped(), 0);

        let evicted = table.sweep_at(Instant::now() + Duration::from_secs(61));
        assert_eq!(evicted, 1);
        assert_eq!(table.dropped(), 1);
        assert!(table.is_empty());

        // A second sweep finds nothing further to drop
        assert_eq!(table.sweep_at(Instant::now() + Duration::from_secs(120)), 0);
        assert_eq!(table.dropped(), 1);
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let mut table = Reassembler::new();
        assert!(matches!(
            table.accept("m1", 3, 3, chunk(b'a', 1)),
            Err(CodecError::ChunkOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_total_mismatch_drops_entry() {
        let mut table = Reassembler::new();
        table.accept("m1", 0, 3, chunk(b'a', 1)).unwrap();
        assert!(matches!(
            table.accept("m1", 1, 4, chunk(b'b', 1)),
            Err(CodecError::ChunkTotalMismatch { .. })
        ));
        assert!(table.is_empty());
        assert_eq!(table.dropped(), 1);
    }

    #[test]
    fn test_capacity_bound_drops_oldest() {
        let mut table = Reassembler::with_limits(2, Duration::from_secs(60));
        table.accept("m1", 0, 2, chunk(b'a', 1)).unwrap();
        table.accept("m2", 0, 2, chunk(b'b', 1)).unwrap();
        table.accept("m3", 0, 2, chunk(b'c', 1)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.dropped(), 1);

        // m1 was evicted; its completion chunk starts a fresh entry
        assert!(matches!(
            table.accept("m1", 1, 2, chunk(b'a', 1)).unwrap(),
            Assembly::Pending
        ));
    }
}
