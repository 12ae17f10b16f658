//! Minion API - configuration, module contracts, registries
//!
//! The agent's seams live here: the validated `MinionConfig`, the traits
//! pluggable modules implement (`SinkModule`, `RpcModule`, and the
//! collector/detector/monitor families), the `Broker` handle modules use
//! to push telemetry upstream, and the `ModuleRegistry` the broker walks
//! at startup.
//!
//! Registries are populated once during process init and never mutated
//! afterwards, so they can be shared across tasks without locking.

mod config;
mod error;
mod module;
mod registry;

pub use config::{BrokerType, Listener, MinionConfig, DEFAULT_SYSLOG_PORT, DEFAULT_TRAP_PORT};
pub use error::{ConfigError, ModuleError, SendError};
pub use module::{
    Broker, BrokerHandle, CollectionRequest, CollectionResult, Collector, DetectRequest,
    Detector, Monitor, PollRequest, PollStatus, RpcModule, SinkModule,
};
pub use registry::{ModuleRegistry, RegistryError};

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
