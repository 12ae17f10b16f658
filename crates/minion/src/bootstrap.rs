//! Startup wiring: configuration merging and module registration
//!
//! Precedence, highest first: flags / environment (already merged by the
//! CLI layer), config file, built-in defaults.

use std::path::Path;

use anyhow::Result;

use minion_api::{BrokerType, MinionConfig, ModuleRegistry};

/// Flag and environment values that override the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub id: Option<String>,
    pub location: Option<String>,
    pub broker_url: Option<String>,
    pub broker_type: Option<String>,
    pub trap_port: Option<u16>,
    pub syslog_port: Option<u16>,
    pub stats_port: Option<u16>,
    pub listeners: Vec<String>,
}

/// Load the config file (when given), apply overrides, and validate
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<MinionConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config file");
            MinionConfig::from_file(path)?
        }
        None => MinionConfig::default(),
    };

    if let Some(id) = overrides.id {
        config.id = id;
    }
    if let Some(location) = overrides.location {
        config.location = location;
    }
    if let Some(broker_url) = overrides.broker_url {
        config.broker_url = broker_url;
    }
    if let Some(broker_type) = overrides.broker_type {
        config.broker_type = broker_type.parse::<BrokerType>()?;
    }
    if let Some(trap_port) = overrides.trap_port {
        config.trap_port = trap_port;
    }
    if let Some(syslog_port) = overrides.syslog_port {
        config.syslog_port = syslog_port;
    }
    if let Some(stats_port) = overrides.stats_port {
        config.stats_port = Some(stats_port);
    }

    // Malformed listener flags are rejected per entry; the rest start up
    let rejected = config.parse_listeners(&overrides.listeners)?;
    for error in rejected {
        tracing::warn!(error = %error, "ignoring malformed listener flag");
    }

    config.is_valid()?;
    Ok(config)
}

/// Build the process-wide registry with every built-in module
pub fn build_registry() -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    minion_sink::register_builtin(&mut registry)?;
    minion_rpc::register_builtin(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FILE_CONFIG: &str = "\
id: file-minion
location: FileLoc
brokerUrl: files:8990
syslogPort: 2514
";

    fn config_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FILE_CONFIG.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_only() {
        let file = config_file();
        let config = load_config(Some(file.path()), Overrides::default()).unwrap();
        assert_eq!(config.id, "file-minion");
        assert_eq!(config.location, "FileLoc");
        assert_eq!(config.syslog_port, 2514);
        // Untouched fields keep their defaults
        assert_eq!(config.trap_port, minion_api::DEFAULT_TRAP_PORT);
    }

    #[test]
    fn test_flags_override_file() {
        let file = config_file();
        let config = load_config(
            Some(file.path()),
            Overrides {
                location: Some("FlagLoc".into()),
                broker_type: Some("pubsub".into()),
                listeners: vec!["Graphite,12003,ForwardParser".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.id, "file-minion");
        assert_eq!(config.location, "FlagLoc");
        assert_eq!(config.broker_type, BrokerType::PubSub);
        assert_eq!(config.get_listener("Graphite").unwrap().port, 12003);
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let err = load_config(None, Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_unknown_broker_type_is_fatal() {
        assert!(load_config(
            None,
            Overrides {
                id: Some("minion01".into()),
                broker_type: Some("kafka".into()),
                ..Default::default()
            },
        )
        .is_err());
    }

    #[test]
    fn test_malformed_listener_flags_do_not_abort() {
        let config = load_config(
            None,
            Overrides {
                id: Some("minion01".into()),
                listeners: vec!["Wrong1,1000".into(), "NXOS,50000,NxosGrpcParser".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(config.get_listener("Wrong1").is_none());
        assert_eq!(config.get_listener("NXOS").unwrap().port, 50000);
    }

    #[test]
    fn test_build_registry() {
        let registry = build_registry().unwrap();
        assert!(registry.sink("Heartbeat").is_some());
        assert!(registry.rpc("Echo").is_some());
    }
}
