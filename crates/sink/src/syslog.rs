//! Raw syslog module
//!
//! Listens for syslog datagrams on the configured syslog port and forwards
//! them unparsed; the server owns RFC 3164/5424 interpretation. A trailing
//! newline is trimmed, matching what most syslog clients append.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use minion_api::{BrokerHandle, MinionConfig, ModuleError, SinkModule};

use crate::udp::UdpIngress;

/// Largest accepted syslog datagram
const MAX_MESSAGE_SIZE: usize = 8192;

/// Workers sharing the syslog port
const WORKERS: usize = 2;

/// Syslog-over-UDP ingress
pub struct SyslogModule {
    cancel: Mutex<Option<CancellationToken>>,
}

impl SyslogModule {
    pub fn new() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }
}

impl Default for SyslogModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkModule for SyslogModule {
    fn id(&self) -> &'static str {
        "Syslog"
    }

    async fn start(&self, config: &MinionConfig, broker: BrokerHandle) -> Result<(), ModuleError> {
        if config.syslog_port == 0 {
            tracing::warn!("syslog port not set, syslog module idle");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());

        UdpIngress {
            module_id: self.id(),
            port: config.syslog_port,
            workers: WORKERS,
            max_packet: MAX_MESSAGE_SIZE,
            trim_newline: true,
        }
        .spawn(broker, cancel)
    }

    async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
    }
}
