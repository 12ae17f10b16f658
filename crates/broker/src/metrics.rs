//! Broker counters
//!
//! Success/failure pairs for every hot-path operation, labeled by module
//! id. SystemId is constant for the process, so it lives on the snapshot
//! rather than on every counter. Counter slots are created on first use
//! and then updated lock-free; the label map takes a read lock only.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// One success/failure counter pair
#[derive(Debug, Default)]
pub struct CounterPair {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl CounterPair {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time values of one counter pair
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CounterSnapshot {
    pub succeeded: u64,
    pub failed: u64,
}

/// A success/failure counter pair per module id
#[derive(Debug, Default)]
pub struct LabeledCounter {
    slots: RwLock<HashMap<String, Arc<CounterPair>>>,
}

impl LabeledCounter {
    /// Record a success for `module_id`
    #[inline]
    pub fn succeeded(&self, module_id: &str) {
        self.slot(module_id).succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure for `module_id`
    #[inline]
    pub fn failed(&self, module_id: &str) {
        self.slot(module_id).failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values for every module seen so far
    pub fn snapshot(&self) -> BTreeMap<String, CounterSnapshot> {
        self.slots
            .read()
            .iter()
            .map(|(id, pair)| (id.clone(), pair.snapshot()))
            .collect()
    }

    /// Current values for one module
    pub fn get(&self, module_id: &str) -> CounterSnapshot {
        self.slots
            .read()
            .get(module_id)
            .map(|pair| pair.snapshot())
            .unwrap_or_default()
    }

    fn slot(&self, module_id: &str) -> Arc<CounterPair> {
        if let Some(pair) = self.slots.read().get(module_id) {
            return Arc::clone(pair);
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(module_id.to_owned())
                .or_insert_with(|| Arc::new(CounterPair::default())),
        )
    }
}

/// All broker counters
#[derive(Debug)]
pub struct BrokerMetrics {
    system_id: String,
    /// Sink message delivery to the server
    pub sink_msg_delivery: LabeledCounter,
    /// RPC requests read off the transport
    pub rpc_req_received: LabeledCounter,
    /// RPC requests executed by modules
    pub rpc_req_processed: LabeledCounter,
    /// RPC responses written to the transport
    pub rpc_res_sent: LabeledCounter,
    /// Requests dropped because their deadline had passed on arrival
    pub requests_expired: AtomicU64,
    /// Partial messages evicted from the reassembly table
    pub reassembly_dropped: AtomicU64,
}

impl BrokerMetrics {
    /// Create the counter set for this agent
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            sink_msg_delivery: LabeledCounter::default(),
            rpc_req_received: LabeledCounter::default(),
            rpc_req_processed: LabeledCounter::default(),
            rpc_res_sent: LabeledCounter::default(),
            requests_expired: AtomicU64::new(0),
            reassembly_dropped: AtomicU64::new(0),
        }
    }

    /// Record evicted reassembly entries
    #[inline]
    pub fn reassembly_drops(&self, count: usize) {
        if count > 0 {
            self.reassembly_dropped
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Record an expired request
    #[inline]
    pub fn request_expired(&self) {
        self.requests_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            system_id: self.system_id.clone(),
            sink_msg_delivery: self.sink_msg_delivery.snapshot(),
            rpc_req_received: self.rpc_req_received.snapshot(),
            rpc_req_processed: self.rpc_req_processed.snapshot(),
            rpc_res_sent: self.rpc_res_sent.snapshot(),
            requests_expired: self.requests_expired.load(Ordering::Relaxed),
            reassembly_dropped: self.reassembly_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of all broker counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub system_id: String,
    pub sink_msg_delivery: BTreeMap<String, CounterSnapshot>,
    pub rpc_req_received: BTreeMap<String, CounterSnapshot>,
    pub rpc_req_processed: BTreeMap<String, CounterSnapshot>,
    pub rpc_res_sent: BTreeMap<String, CounterSnapshot>,
    pub requests_expired: u64,
    pub reassembly_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_counter_per_module() {
        let counter = LabeledCounter::default();
        counter.succeeded("Trap");
        counter.succeeded("Trap");
        counter.failed("Syslog");

        assert_eq!(counter.get("Trap").succeeded, 2);
        assert_eq!(counter.get("Trap").failed, 0);
        assert_eq!(counter.get("Syslog").failed, 1);
        assert_eq!(counter.get("Unknown").succeeded, 0);
    }

    #[test]
    fn test_snapshot_is_ordered_by_module() {
        let metrics = BrokerMetrics::new("minion01");
        metrics.sink_msg_delivery.succeeded("Trap");
        metrics.sink_msg_delivery.succeeded("Heartbeat");
        metrics.request_expired();
        metrics.reassembly_drops(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.system_id, "minion01");
        let modules: Vec<&String> = snapshot.sink_msg_delivery.keys().collect();
        assert_eq!(modules, vec!["Heartbeat", "Trap"]);
        assert_eq!(snapshot.requests_expired, 1);
        assert_eq!(snapshot.reassembly_dropped, 3);
    }
}
