//! Built-in Sink modules
//!
//! - `HeartbeatModule` - periodic liveness beacon so the server marks the
//!   agent's location live
//! - `ForwardModule` - generic UDP listener bound through the listener
//!   table; forwards datagrams verbatim
//! - `SyslogModule` - raw syslog over UDP on the configured syslog port
//!
//! Protocol parsing happens server-side; these modules ship payloads
//! unmodified inside the sink envelope.

mod forward;
mod heartbeat;
mod syslog;
mod udp;

use std::sync::Arc;

use minion_api::{ModuleRegistry, RegistryError};

pub use forward::ForwardModule;
pub use heartbeat::HeartbeatModule;
pub use syslog::SyslogModule;

/// Register every built-in Sink module
pub fn register_builtin(registry: &mut ModuleRegistry) -> Result<(), RegistryError> {
    registry.register_sink(Arc::new(HeartbeatModule::new()))?;
    registry.register_sink(Arc::new(ForwardModule::new()))?;
    registry.register_sink(Arc::new(SyslogModule::new()))?;
    Ok(())
}
