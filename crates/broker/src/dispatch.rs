//! RPC request dispatch
//!
//! Both transports hand completed requests to the dispatcher. It drops
//! expired requests without touching the module, looks up the RPC module,
//! and runs each request in its own task so one slow module never blocks
//! the others. In-flight workers are bounded per module by a semaphore
//! sized from the `rpc-workers-per-module` broker property.
//!
//! Responses flow back through an mpsc channel; the transport owns the
//! receiving end and serializes the actual writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tracing::Instrument;

use minion_api::{MinionConfig, ModuleRegistry, RpcModule};
use minion_ipc::{RpcRequest, RpcResponse};

use crate::metrics::BrokerMetrics;

/// Default bound on concurrently executing requests per module
const DEFAULT_WORKERS_PER_MODULE: usize = 8;

/// Property key overriding the per-module worker bound
const WORKERS_PROPERTY: &str = "rpc-workers-per-module";

/// Capacity of the response channel between workers and the transport
pub(crate) const RESPONSE_CHANNEL_SIZE: usize = 256;

/// Milliseconds since the Unix epoch
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shared request dispatcher
pub(crate) struct RpcDispatcher {
    system_id: String,
    location: String,
    registry: Arc<ModuleRegistry>,
    metrics: Arc<BrokerMetrics>,
    response_tx: mpsc::Sender<RpcResponse>,
    permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    workers_per_module: usize,
}

impl RpcDispatcher {
    pub(crate) fn new(
        config: &MinionConfig,
        registry: Arc<ModuleRegistry>,
        metrics: Arc<BrokerMetrics>,
        response_tx: mpsc::Sender<RpcResponse>,
    ) -> Self {
        let workers_per_module = config
            .broker_property(WORKERS_PROPERTY)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_WORKERS_PER_MODULE);
        Self {
            system_id: config.id.clone(),
            location: config.location.clone(),
            registry,
            metrics,
            response_tx,
            permits: Mutex::new(HashMap::new()),
            workers_per_module,
        }
    }

    /// Hand one completed (reassembled) request to its module.
    ///
    /// Never blocks: execution happens in a spawned worker task.
    pub(crate) fn dispatch(&self, request: RpcRequest) {
        let module_id = request.module_id.clone();
        let rpc_id = request.rpc_id.clone();

        if request.is_expired_at(epoch_ms()) {
            tracing::warn!(
                rpc_id = %rpc_id,
                module_id = %module_id,
                expiration = request.expiration_time,
                "dropping expired rpc request"
            );
            self.metrics.request_expired();
            self.metrics.rpc_req_processed.failed(&module_id);
            return;
        }

        let Some(module) = self.registry.rpc(&module_id).cloned() else {
            tracing::error!(
                rpc_id = %rpc_id,
                module_id = %module_id,
                "no rpc module for request, ignoring"
            );
            self.metrics.rpc_req_processed.failed(&module_id);
            return;
        };

        let semaphore = self.permit_pool(&module_id);
        let metrics = Arc::clone(&self.metrics);
        let response_tx = self.response_tx.clone();
        let system_id = self.system_id.clone();
        let location = self.location.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            run_worker(module, request, metrics, response_tx, system_id, location).await;
        });
    }

    fn permit_pool(&self, module_id: &str) -> Arc<Semaphore> {
        let mut permits = self.permits.lock();
        Arc::clone(
            permits
                .entry(module_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(self.workers_per_module))),
        )
    }
}

/// Execute one request inside its own task, bounded by the request deadline
async fn run_worker(
    module: Arc<dyn RpcModule>,
    request: RpcRequest,
    metrics: Arc<BrokerMetrics>,
    response_tx: mpsc::Sender<RpcResponse>,
    system_id: String,
    location: String,
) {
    let module_id = request.module_id.clone();
    let rpc_id = request.rpc_id.clone();
    let span = tracing::debug_span!("rpc.execute", module_id = %module_id, rpc_id = %rpc_id);

    // Workers must not run past the request deadline
    let remaining = (request.expiration_time != 0)
        .then(|| request.expiration_time.saturating_sub(epoch_ms()))
        .map(Duration::from_millis);

    let execution = module.execute(request).instrument(span);
    let response = match remaining {
        Some(budget) => tokio::time::timeout(budget, execution).await.ok().flatten(),
        None => execution.await,
    };

    match response {
        Some(mut response) => {
            metrics.rpc_req_processed.succeeded(&module_id);
            response.system_id = system_id;
            response.location = location;
            if response_tx.send(response).await.is_err() {
                tracing::debug!(
                    rpc_id = %rpc_id,
                    "response channel closed, dropping rpc response"
                );
            }
        }
        None => {
            metrics.rpc_req_processed.failed(&module_id);
            tracing::warn!(
                rpc_id = %rpc_id,
                module_id = %module_id,
                "module returned no response, ignoring request"
            );
        }
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
