//! Generic UDP forward module
//!
//! Binds through the listener table (parser `ForwardParser`) and forwards
//! every datagram verbatim. This covers Graphite and similar line
//! protocols whose parsing lives server-side. The `workers` listener
//! property sets the number of sockets sharing the port.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use minion_api::{BrokerHandle, MinionConfig, ModuleError, SinkModule};

use crate::udp::UdpIngress;

/// Parser name this module binds to
const PARSER: &str = "ForwardParser";

/// Largest accepted datagram
const MAX_PACKET: usize = 65_535;

/// Default worker count when the listener does not set one
const DEFAULT_WORKERS: usize = 1;

/// Verbatim UDP forwarder
pub struct ForwardModule {
    cancel: Mutex<Option<CancellationToken>>,
}

impl ForwardModule {
    pub fn new() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }
}

impl Default for ForwardModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkModule for ForwardModule {
    fn id(&self) -> &'static str {
        "Forward"
    }

    async fn start(&self, config: &MinionConfig, broker: BrokerHandle) -> Result<(), ModuleError> {
        let Some(listener) = config.get_listener_by_parser(PARSER) else {
            tracing::warn!("no listener configured for {PARSER}, forward module idle");
            return Ok(());
        };
        if listener.port == 0 {
            tracing::warn!(listener = %listener.name, "forward listener has no port, module idle");
            return Ok(());
        }

        let workers = listener
            .property("workers")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_WORKERS);

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = Some(cancel.clone());

        UdpIngress {
            module_id: self.id(),
            port: listener.port,
            workers,
            max_packet: MAX_PACKET,
            trim_newline: false,
        }
        .spawn(broker, cancel)
    }

    async fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
#[path = "forward_test.rs"]
mod forward_test;
