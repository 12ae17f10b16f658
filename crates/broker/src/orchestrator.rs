//! Sink module lifecycle
//!
//! Modules start in registry (id) order before RPC dispatch is enabled, so
//! anything they push on start lands on a live transport. A module that
//! fails to start is logged and left disabled; one broken listener must
//! not take the agent down. Stop runs every started module's stop hook
//! inside the grace period and is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use minion_api::{BrokerHandle, MinionConfig, ModuleRegistry, SinkModule};

/// Time budget for one module's stop hook
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Starts and stops the registered Sink modules
pub(crate) struct Orchestrator {
    registry: Arc<ModuleRegistry>,
    started: Mutex<Vec<Arc<dyn SinkModule>>>,
    stopped: AtomicBool,
}

impl Orchestrator {
    pub(crate) fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            started: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Start every registered Sink module, continuing past failures.
    ///
    /// Returns how many modules started successfully.
    pub(crate) async fn start_modules(
        &self,
        config: &MinionConfig,
        broker: BrokerHandle,
    ) -> usize {
        let mut started = self.started.lock().await;
        for module in self.registry.all_sinks() {
            match module.start(config, Arc::clone(&broker)).await {
                Ok(()) => {
                    tracing::info!(module_id = module.id(), "sink module started");
                    started.push(Arc::clone(module));
                }
                Err(e) => {
                    tracing::error!(
                        module_id = module.id(),
                        error = %e,
                        "sink module failed to start, disabling"
                    );
                }
            }
        }
        started.len()
    }

    /// Stop every started module. Safe to call more than once.
    pub(crate) async fn stop_modules(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let started = std::mem::take(&mut *self.started.lock().await);
        for module in started {
            if tokio::time::timeout(STOP_GRACE, module.stop()).await.is_err() {
                tracing::warn!(
                    module_id = module.id(),
                    "sink module did not stop within grace period"
                );
            } else {
                tracing::info!(module_id = module.id(), "sink module stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use minion_api::ModuleError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Probe {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    struct ProbeModule {
        id: &'static str,
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl SinkModule for ProbeModule {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn start(
            &self,
            _config: &MinionConfig,
            _broker: BrokerHandle,
        ) -> Result<(), ModuleError> {
            self.probe.starts.fetch_add(1, Ordering::SeqCst);
            if self.probe.fail_start {
                return Err(ModuleError::Config {
                    reason: "broken".into(),
                });
            }
            Ok(())
        }

        async fn stop(&self) {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullBroker;

    #[async_trait]
    impl minion_api::Broker for NullBroker {
        async fn send(&self, _message: minion_ipc::SinkMessage) -> Result<(), minion_api::SendError> {
            Ok(())
        }
    }

    fn registry_with(probes: &[(&'static str, Arc<Probe>)]) -> Arc<ModuleRegistry> {
        let mut registry = ModuleRegistry::new();
        for (id, probe) in probes {
            registry
                .register_sink(Arc::new(ProbeModule {
                    id,
                    probe: Arc::clone(probe),
                }))
                .unwrap();
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_start_continues_past_failures() {
        let good = Arc::new(Probe::default());
        let bad = Arc::new(Probe {
            fail_start: true,
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(registry_with(&[
            ("Bad", Arc::clone(&bad)),
            ("Good", Arc::clone(&good)),
        ]));

        let started = orchestrator
            .start_modules(&MinionConfig::default(), Arc::new(NullBroker))
            .await;

        assert_eq!(started, 1);
        assert_eq!(good.starts.load(Ordering::SeqCst), 1);
        assert_eq!(bad.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_only_touches_started_and_is_idempotent() {
        let good = Arc::new(Probe::default());
        let bad = Arc::new(Probe {
            fail_start: true,
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(registry_with(&[
            ("Bad", Arc::clone(&bad)),
            ("Good", Arc::clone(&good)),
        ]));

        orchestrator
            .start_modules(&MinionConfig::default(), Arc::new(NullBroker))
            .await;
        orchestrator.stop_modules().await;
        orchestrator.stop_modules().await;

        assert_eq!(good.stops.load(Ordering::SeqCst), 1);
        assert_eq!(bad.stops.load(Ordering::SeqCst), 0);
    }
}
