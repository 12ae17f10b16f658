//! Built-in RPC modules
//!
//! Only the connectivity probe ships here; the heavier poll, detect, and
//! collect modules plug in through the same registry.

mod echo;

use std::sync::Arc;

use minion_api::{ModuleRegistry, RegistryError};

pub use echo::EchoModule;

/// Register every built-in RPC module
pub fn register_builtin(registry: &mut ModuleRegistry) -> Result<(), RegistryError> {
    registry.register_rpc(Arc::new(EchoModule))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin() {
        let mut registry = ModuleRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert!(registry.rpc("Echo").is_some());
    }
}
