//! Heartbeat module
//!
//! Sends a small XML heartbeat document upstream every 30 seconds so the
//! server keeps this agent's location marked live. The first beat goes out
//! immediately after start.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use minion_api::{BrokerHandle, MinionConfig, ModuleError, SinkModule};
use minion_ipc::SinkMessage;

/// Beat cadence expected by the server
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic liveness beacon
pub struct HeartbeatModule {
    cancel: Mutex<Option<CancellationToken>>,
}

impl HeartbeatModule {
    pub fn new() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }
}

impl Default for HeartbeatModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkModule for HeartbeatModule {
    fn id(&self) -> &'static str {
        "Heartbeat"
    }

    async fn start(&self, config: &MinionConfig, broker: BrokerHandle) -> Result<(), ModuleError> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());

        let system_id = config.id.clone();
        let location = config.location.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let beat = heartbeat_document(&system_id, &location);
                        tracing::debug!(system_id = %system_id, "sending heartbeat");
                        if let Err(e) = broker.send(SinkMessage::new("Heartbeat", beat)).await {
                            tracing::warn!(error = %e, "heartbeat dropped");
                        }
                    }
                }
            }
            tracing::debug!("heartbeat worker stopped");
        });
        Ok(())
    }

    async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
    }
}

fn heartbeat_document(system_id: &str, location: &str) -> Bytes {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Bytes::from(format!(
        "<minion><id>{system_id}</id><location>{location}</location><timestamp>{timestamp}</timestamp></minion>"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minion_api::{Broker, SendError};
    use parking_lot::Mutex as SyncMutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct CapturingBroker {
        messages: SyncMutex<Vec<SinkMessage>>,
    }

    #[async_trait]
    impl Broker for CapturingBroker {
        async fn send(&self, message: SinkMessage) -> Result<(), SendError> {
            self.messages.lock().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_beat_goes_out_immediately() {
        let module = HeartbeatModule::new();
        let broker = Arc::new(CapturingBroker::default());
        let config = MinionConfig {
            id: "minion01".into(),
            location: "Apex".into(),
            ..Default::default()
        };

        module
            .start(&config, broker.clone())
            .await
            .expect("start is non-blocking");

        // The interval's first tick fires right away
        tokio::time::sleep(Duration::from_millis(200)).await;
        let messages = broker.messages.lock().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].module_id, "Heartbeat");
        let body = String::from_utf8(messages[0].content.to_vec()).unwrap();
        assert!(body.contains("<id>minion01</id>"));
        assert!(body.contains("<location>Apex</location>"));

        module.stop().await;
        module.stop().await; // idempotent
    }
}
