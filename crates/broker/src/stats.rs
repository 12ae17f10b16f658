//! Local stats endpoint
//!
//! When `statsPort` is configured, a small HTTP surface exposes the broker
//! counters as JSON for scraping and troubleshooting.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::metrics::{BrokerMetrics, MetricsSnapshot};

/// Serve `GET /stats` until the shutdown token fires
pub async fn serve_stats(
    port: u16,
    metrics: Arc<BrokerMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/stats", get(stats_handler))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "stats endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn stats_handler(State(metrics): State<Arc<BrokerMetrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stats_endpoint_serves_snapshot() {
        let metrics = Arc::new(BrokerMetrics::new("minion01"));
        metrics.sink_msg_delivery.succeeded("Heartbeat");
        let shutdown = CancellationToken::new();

        // Bind on an ephemeral port by hand so the test can find it
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/stats", get(stats_handler))
            .with_state(Arc::clone(&metrics));
        let server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                    .unwrap();
            }
        });

        // Plain HTTP/1.0 request, no client dependency needed
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET /stats HTTP/1.0\r\nHost: localhost\r\n\r\n",
        )
        .await
        .unwrap();
        let mut body = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut body).await.unwrap();
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("200 OK"));
        assert!(body.contains("\"system_id\":\"minion01\""));
        assert!(body.contains("Heartbeat"));

        shutdown.cancel();
        server.await.unwrap();
    }
}
