//! Module registries
//!
//! One mapping per module kind, populated by an explicit registration
//! routine before the broker starts. A duplicate id is an init-time error.
//! After startup the registry is read-only and can be shared across tasks
//! behind an `Arc` without locking.
//!
//! `BTreeMap` keeps iteration ordered by id, so startup logs and module
//! start order are deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::module::{Collector, Detector, Monitor, RpcModule, SinkModule};

/// Registration failures; all of them are fatal at init time
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two modules of the same kind share an id
    #[error("duplicate {kind} module id '{id}'")]
    DuplicateId {
        /// Module kind ("sink", "rpc", ...)
        kind: &'static str,
        /// The conflicting id
        id: String,
    },
}

/// Process-wide module tables, one per kind
#[derive(Default)]
pub struct ModuleRegistry {
    sink: BTreeMap<String, Arc<dyn SinkModule>>,
    rpc: BTreeMap<String, Arc<dyn RpcModule>>,
    collectors: BTreeMap<String, Arc<dyn Collector>>,
    detectors: BTreeMap<String, Arc<dyn Detector>>,
    monitors: BTreeMap<String, Arc<dyn Monitor>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Sink module
    pub fn register_sink(&mut self, module: Arc<dyn SinkModule>) -> Result<(), RegistryError> {
        let id = module.id().to_owned();
        if self.sink.insert(id.clone(), module).is_some() {
            return Err(RegistryError::DuplicateId { kind: "sink", id });
        }
        Ok(())
    }

    /// Register an RPC module
    pub fn register_rpc(&mut self, module: Arc<dyn RpcModule>) -> Result<(), RegistryError> {
        let id = module.id().to_owned();
        if self.rpc.insert(id.clone(), module).is_some() {
            return Err(RegistryError::DuplicateId { kind: "rpc", id });
        }
        Ok(())
    }

    /// Register a collector
    pub fn register_collector(&mut self, module: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let id = module.id().to_owned();
        if self.collectors.insert(id.clone(), module).is_some() {
            return Err(RegistryError::DuplicateId {
                kind: "collector",
                id,
            });
        }
        Ok(())
    }

    /// Register a detector
    pub fn register_detector(&mut self, module: Arc<dyn Detector>) -> Result<(), RegistryError> {
        let id = module.id().to_owned();
        if self.detectors.insert(id.clone(), module).is_some() {
            return Err(RegistryError::DuplicateId {
                kind: "detector",
                id,
            });
        }
        Ok(())
    }

    /// Register a monitor
    pub fn register_monitor(&mut self, module: Arc<dyn Monitor>) -> Result<(), RegistryError> {
        let id = module.id().to_owned();
        if self.monitors.insert(id.clone(), module).is_some() {
            return Err(RegistryError::DuplicateId {
                kind: "monitor",
                id,
            });
        }
        Ok(())
    }

    /// Look up a Sink module by id
    pub fn sink(&self, id: &str) -> Option<&Arc<dyn SinkModule>> {
        self.sink.get(id)
    }

    /// Look up an RPC module by id
    pub fn rpc(&self, id: &str) -> Option<&Arc<dyn RpcModule>> {
        self.rpc.get(id)
    }

    /// Look up a collector by id
    pub fn collector(&self, id: &str) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(id)
    }

    /// Look up a detector by id
    pub fn detector(&self, id: &str) -> Option<&Arc<dyn Detector>> {
        self.detectors.get(id)
    }

    /// Look up a monitor by id
    pub fn monitor(&self, id: &str) -> Option<&Arc<dyn Monitor>> {
        self.monitors.get(id)
    }

    /// All Sink modules, ordered by id
    pub fn all_sinks(&self) -> impl Iterator<Item = &Arc<dyn SinkModule>> {
        self.sink.values()
    }

    /// All RPC modules, ordered by id
    pub fn all_rpc(&self) -> impl Iterator<Item = &Arc<dyn RpcModule>> {
        self.rpc.values()
    }

    /// All collectors, ordered by id
    pub fn all_collectors(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.values()
    }

    /// All detectors, ordered by id
    pub fn all_detectors(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.values()
    }

    /// All monitors, ordered by id
    pub fn all_monitors(&self) -> impl Iterator<Item = &Arc<dyn Monitor>> {
        self.monitors.values()
    }

    /// Log every registered module at debug level
    pub fn log_modules(&self) {
        for module in self.all_sinks() {
            tracing::debug!(id = module.id(), "registered sink module");
        }
        for module in self.all_rpc() {
            tracing::debug!(id = module.id(), "registered rpc module");
        }
        for module in self.all_collectors() {
            tracing::debug!(id = module.id(), "registered collector");
        }
        for module in self.all_detectors() {
            tracing::debug!(id = module.id(), "registered detector");
        }
        for module in self.all_monitors() {
            tracing::debug!(id = module.id(), "registered monitor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{BrokerHandle, RpcModule, SinkModule};
    use crate::{MinionConfig, ModuleError};
    use async_trait::async_trait;
    use minion_ipc::{RpcRequest, RpcResponse};

    struct FakeSink(&'static str);

    #[async_trait]
    impl SinkModule for FakeSink {
        fn id(&self) -> &'static str {
            self.0
        }
        async fn start(
            &self,
            _config: &MinionConfig,
            _broker: BrokerHandle,
        ) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn stop(&self) {}
    }

    struct FakeRpc(&'static str);

    #[async_trait]
    impl RpcModule for FakeRpc {
        fn id(&self) -> &'static str {
            self.0
        }
        async fn execute(&self, _request: RpcRequest) -> Option<RpcResponse> {
            None
        }
    }

    #[test]
    fn test_duplicate_sink_id_detected() {
        let mut registry = ModuleRegistry::new();
        registry.register_sink(Arc::new(FakeSink("Syslog"))).unwrap();
        let err = registry
            .register_sink(Arc::new(FakeSink("Syslog")))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateId { kind: "sink", .. }
        ));
    }

    #[test]
    fn test_same_id_across_kinds_is_fine() {
        let mut registry = ModuleRegistry::new();
        registry.register_sink(Arc::new(FakeSink("Echo"))).unwrap();
        registry.register_rpc(Arc::new(FakeRpc("Echo"))).unwrap();
        assert!(registry.sink("Echo").is_some());
        assert!(registry.rpc("Echo").is_some());
    }

    #[test]
    fn test_lookup_missing_is_none() {
        let registry = ModuleRegistry::new();
        assert!(registry.sink("nope").is_none());
        assert!(registry.rpc("nope").is_none());
        assert!(registry.collector("nope").is_none());
    }

    #[test]
    fn test_all_sinks_ordered_by_id() {
        let mut registry = ModuleRegistry::new();
        for id in ["Trap", "Heartbeat", "Syslog"] {
            registry.register_sink(Arc::new(FakeSink(id))).unwrap();
        }
        let ids: Vec<&str> = registry.all_sinks().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["Heartbeat", "Syslog", "Trap"]);
    }
}
