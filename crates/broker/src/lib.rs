//! Minion broker
//!
//! The long-lived, multiplexed, bidirectional path between this agent and
//! the monitoring server. Two transport variants sit behind one contract:
//!
//! - `StreamingClient` - a single session-oriented connection carrying the
//!   Sink and RPC streams as framed envelopes
//! - `PubSubClient` - topic-based publish/subscribe messaging
//!
//! Both share the codec, the RPC dispatcher, and the module orchestrator
//! by composition. `create_broker` picks the variant from the validated
//! configuration.
//!
//! # Architecture
//!
//! ```text
//! [Sink modules] --Send--> +--------------+           +--------+
//!                          | BrokerClient | <=======> | server |
//! [RPC modules]  <-exec--  +--------------+           +--------+
//!        \--response--> dispatcher --> transport writer
//! ```

mod dispatch;
mod error;
pub mod frame;
mod metrics;
mod orchestrator;
mod pubsub;
mod session;
mod stats;
mod tls;

use std::sync::Arc;

use async_trait::async_trait;

use minion_api::{Broker, BrokerType, MinionConfig, ModuleRegistry};

pub use error::BrokerError;
pub use metrics::{BrokerMetrics, CounterSnapshot, LabeledCounter, MetricsSnapshot};
pub use pubsub::PubSubClient;
pub use session::StreamingClient;
pub use stats::serve_stats;
pub use tls::{connector_from_config, server_name};

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Full broker lifecycle, on top of the module-facing `Broker` send contract
#[async_trait]
pub trait BrokerClient: Broker + std::fmt::Debug {
    /// Open the transport, start the Sink modules, begin serving RPC
    /// requests. Fatal errors here should end the process.
    async fn start(&self) -> Result<()>;

    /// Stop modules, close the transport. Idempotent.
    async fn stop(&self);

    /// Counter set for this broker instance
    fn metrics(&self) -> Arc<BrokerMetrics>;
}

/// Instantiate the broker variant selected by the configuration.
///
/// The configuration must already be validated.
pub fn create_broker(
    config: Arc<MinionConfig>,
    registry: Arc<ModuleRegistry>,
) -> Result<Arc<dyn BrokerClient>> {
    match config.broker_type {
        BrokerType::Streaming => Ok(Arc::new(StreamingClient::new(config, registry)?)),
        BrokerType::PubSub => Ok(Arc::new(PubSubClient::new(config, registry)?)),
    }
}
