//! Echo module
//!
//! Returns the request payload unchanged. The server uses this to verify
//! round-trip connectivity with an agent.

use async_trait::async_trait;

use minion_api::RpcModule;
use minion_ipc::{RpcRequest, RpcResponse};

/// Round-trip connectivity probe
pub struct EchoModule;

#[async_trait]
impl RpcModule for EchoModule {
    fn id(&self) -> &'static str {
        "Echo"
    }

    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        tracing::debug!(rpc_id = %request.rpc_id, bytes = request.content.len(), "echoing request");
        let content = request.content.clone();
        Some(RpcResponse::for_request(&request, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_echo_returns_payload_verbatim() {
        let request = RpcRequest {
            rpc_id: "r1".into(),
            module_id: "Echo".into(),
            content: Bytes::from_static(b"ping"),
            ..Default::default()
        };
        let response = EchoModule.execute(request).await.expect("echo always replies");
        assert_eq!(response.rpc_id, "r1");
        assert_eq!(response.module_id, "Echo");
        assert_eq!(&response.content[..], b"ping");
        assert!(response.error.is_empty());
    }
}
