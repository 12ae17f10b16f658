//! Module contracts
//!
//! A *module* is a pluggable protocol implementation keyed by a stable
//! string id. Sink modules listen for unsolicited telemetry and push it
//! upstream through the `Broker` handle; RPC modules answer on-demand
//! requests from the server. The collector, detector, and monitor families
//! are the building blocks RPC modules delegate to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use minion_ipc::{RpcRequest, RpcResponse, SinkMessage};

use crate::config::MinionConfig;
use crate::error::{ModuleError, SendError};

/// Upstream data path handed to Sink modules.
///
/// `send` is safe to call from any task; implementations serialize
/// concurrent calls internally. On unrecoverable transport failure the
/// message is lost - callers drop it and the broker records the failure.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Forward a sink message to the monitoring server
    async fn send(&self, message: SinkMessage) -> Result<(), SendError>;
}

/// Shared broker handle injected into Sink modules at start
pub type BrokerHandle = Arc<dyn Broker>;

/// A telemetry ingress module (trap, syslog, flow, streaming telemetry, ...)
#[async_trait]
pub trait SinkModule: Send + Sync {
    /// Stable module id, used for registry lookup and wire routing
    fn id(&self) -> &'static str;

    /// Start listening.
    ///
    /// Must return promptly; blocking I/O belongs in spawned worker tasks.
    async fn start(&self, config: &MinionConfig, broker: BrokerHandle) -> Result<(), ModuleError>;

    /// Stop all workers and close all sockets.
    ///
    /// Must be idempotent and finish within the shutdown grace period.
    async fn stop(&self);
}

/// An on-demand operation module (poll, detect, collect, echo, ...)
#[async_trait]
pub trait RpcModule: Send + Sync {
    /// Stable module id, matched against `RpcRequest::module_id`
    fn id(&self) -> &'static str;

    /// Execute a request, blocking at most until its expiration.
    ///
    /// `None` means "no reply": the request is dropped silently and the
    /// broker records a processing failure.
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse>;
}

/// Data collection request routed to a `Collector`
#[derive(Debug, Clone, Default)]
pub struct CollectionRequest {
    /// Service name being collected
    pub service: String,
    /// Target address
    pub address: String,
    /// Collector-specific attributes
    pub attributes: HashMap<String, String>,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Default)]
pub struct CollectionResult {
    /// Whether collection succeeded
    pub success: bool,
    /// Failure description when unsuccessful
    pub error: Option<String>,
    /// Collected metric values by name
    pub metrics: HashMap<String, f64>,
}

/// Metric collection implementation
pub trait Collector: Send + Sync {
    /// Stable collector id
    fn id(&self) -> &'static str;

    /// Run the collection described by the request
    fn collect(&self, request: &CollectionRequest) -> CollectionResult;
}

/// Service detection request routed to a `Detector`
#[derive(Debug, Clone, Default)]
pub struct DetectRequest {
    /// Service name being detected
    pub service: String,
    /// Target address
    pub address: String,
    /// Detector-specific attributes
    pub attributes: HashMap<String, String>,
}

/// Service detection implementation
pub trait Detector: Send + Sync {
    /// Stable detector id
    fn id(&self) -> &'static str;

    /// Whether the service is present on the target
    fn detect(&self, request: &DetectRequest) -> bool;
}

/// Polling request routed to a `Monitor`
#[derive(Debug, Clone, Default)]
pub struct PollRequest {
    /// Service name being polled
    pub service: String,
    /// Target address
    pub address: String,
    /// Monitor-specific attributes
    pub attributes: HashMap<String, String>,
}

/// Status of a polled service
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Service responded
    Up {
        /// Observed response time
        response_time: Duration,
    },
    /// Service did not respond
    Down {
        /// Failure description
        reason: String,
    },
    /// Poll could not run
    Unknown {
        /// Why the status could not be determined
        reason: String,
    },
}

/// Service polling implementation
pub trait Monitor: Send + Sync {
    /// Stable monitor id
    fn id(&self) -> &'static str;

    /// Poll the service described by the request
    fn poll(&self, request: &PollRequest) -> PollStatus;
}
