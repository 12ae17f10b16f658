use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use minion_api::{MinionConfig, ModuleRegistry, RpcModule};
use minion_ipc::{RpcRequest, RpcResponse};

use crate::dispatch::{epoch_ms, RpcDispatcher};
use crate::metrics::BrokerMetrics;

/// Test module that reverses the request payload
struct ReverseEcho;

#[async_trait]
impl RpcModule for ReverseEcho {
    fn id(&self) -> &'static str {
        "Echo"
    }

    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let mut reversed = request.content.to_vec();
        reversed.reverse();
        Some(RpcResponse::for_request(&request, Bytes::from(reversed)))
    }
}

/// Test module that must never run
struct Unreachable;

#[async_trait]
impl RpcModule for Unreachable {
    fn id(&self) -> &'static str {
        "Echo"
    }

    async fn execute(&self, _request: RpcRequest) -> Option<RpcResponse> {
        panic!("execute must not be invoked for expired requests");
    }
}

/// Test module that declines to answer
struct Mute;

#[async_trait]
impl RpcModule for Mute {
    fn id(&self) -> &'static str {
        "Mute"
    }

    async fn execute(&self, _request: RpcRequest) -> Option<RpcResponse> {
        None
    }
}

fn harness(
    module: Arc<dyn RpcModule>,
) -> (
    Arc<RpcDispatcher>,
    Arc<BrokerMetrics>,
    mpsc::Receiver<RpcResponse>,
) {
    let config = MinionConfig {
        id: "minion01".into(),
        location: "Test".into(),
        ..Default::default()
    };
    let mut registry = ModuleRegistry::new();
    registry.register_rpc(module).unwrap();
    let metrics = Arc::new(BrokerMetrics::new(&config.id));
    let (tx, rx) = mpsc::channel(16);
    let dispatcher = Arc::new(RpcDispatcher::new(
        &config,
        Arc::new(registry),
        Arc::clone(&metrics),
        tx,
    ));
    (dispatcher, metrics, rx)
}

fn request(rpc_id: &str, module_id: &str, payload: &[u8], expiration_time: u64) -> RpcRequest {
    RpcRequest {
        rpc_id: rpc_id.into(),
        module_id: module_id.into(),
        content: Bytes::copy_from_slice(payload),
        expiration_time,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_dispatch_executes_and_responds() {
    let (dispatcher, metrics, mut rx) = harness(Arc::new(ReverseEcho));

    dispatcher.dispatch(request("r1", "Echo", b"hello", epoch_ms() + 10_000));

    let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("response within deadline")
        .expect("channel open");
    assert_eq!(response.rpc_id, "r1");
    assert_eq!(&response.content[..], b"olleh");
    assert_eq!(response.system_id, "minion01");
    assert_eq!(response.location, "Test");
    assert_eq!(metrics.rpc_req_processed.get("Echo").succeeded, 1);
    assert_eq!(metrics.rpc_req_processed.get("Echo").failed, 0);
}

#[tokio::test]
async fn test_expired_request_never_reaches_module() {
    let (dispatcher, metrics, mut rx) = harness(Arc::new(Unreachable));

    dispatcher.dispatch(request("r2", "Echo", b"hello", epoch_ms() - 1_000));

    // Give any (incorrect) worker a chance to run before checking
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(metrics.rpc_req_processed.get("Echo").failed, 1);
    assert_eq!(metrics.snapshot().requests_expired, 1);
}

#[tokio::test]
async fn test_unknown_module_dropped() {
    let (dispatcher, metrics, mut rx) = harness(Arc::new(ReverseEcho));

    dispatcher.dispatch(request("r3", "Nope", b"x", 0));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(metrics.rpc_req_processed.get("Nope").failed, 1);
}

#[tokio::test]
async fn test_empty_response_counts_failure() {
    let (dispatcher, metrics, mut rx) = harness(Arc::new(Mute));

    dispatcher.dispatch(request("r4", "Mute", b"x", 0));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(metrics.rpc_req_processed.get("Mute").failed, 1);
    assert_eq!(metrics.rpc_req_processed.get("Mute").succeeded, 0);
}

#[tokio::test]
async fn test_request_without_deadline_runs() {
    let (dispatcher, _metrics, mut rx) = harness(Arc::new(ReverseEcho));

    dispatcher.dispatch(request("r5", "Echo", b"ab", 0));

    let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&response.content[..], b"ba");
}
