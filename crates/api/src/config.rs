//! Minion configuration
//!
//! YAML-based configuration with sensible defaults. The agent needs an
//! identity (`id`, `location`) and a broker endpoint; everything else can
//! be left alone. Listeners bind protocol parsers to ports and can come
//! from the config file or from repeated `Name,Port,Parser` flags.
//!
//! Configuration is validated once at startup and read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ConfigResult;

/// Default SNMP trap port (unprivileged)
pub const DEFAULT_TRAP_PORT: u16 = 1162;

/// Default syslog port (unprivileged)
pub const DEFAULT_SYSLOG_PORT: u16 = 1514;

/// Transport variant used to reach the monitoring server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// Single session-oriented connection with multiplexed streams
    Streaming,
    /// Topic-based publish/subscribe messaging
    PubSub,
}

impl FromStr for BrokerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "streaming" => Ok(Self::Streaming),
            "pubsub" => Ok(Self::PubSub),
            other => Err(ConfigError::UnknownBrokerType {
                broker_type: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streaming => f.write_str("streaming"),
            Self::PubSub => f.write_str("pubsub"),
        }
    }
}

/// A telemetry listener: binds a parser implementation to a local port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Listener {
    /// Unique name within the configuration
    pub name: String,
    /// Parser implementation, possibly a fully qualified class name
    /// coming from server-side configuration
    pub parser: String,
    /// Local UDP/TCP port to listen on
    pub port: u16,
    /// Listener-specific tunables (worker counts, buffer sizes, ...)
    pub properties: HashMap<String, String>,
}

impl Listener {
    /// The simple parser name: the final dotted segment of `parser`
    pub fn parser_class(&self) -> &str {
        self.parser.rsplit('.').next().unwrap_or_default()
    }

    /// Look up a listener property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Parse a `Name,Port,Parser` flag value
    pub fn parse_flag(entry: &str) -> ConfigResult<Self> {
        let parts: Vec<&str> = entry.split(',').collect();
        if parts.len() != 3 {
            return Err(ConfigError::MalformedListener {
                entry: entry.to_owned(),
            });
        }
        let port = parts[1]
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::MalformedListener {
                entry: entry.to_owned(),
            })?;
        Ok(Self {
            name: parts[0].trim().to_owned(),
            parser: parts[2].trim().to_owned(),
            port,
            properties: HashMap::new(),
        })
    }
}

/// Validated agent configuration
///
/// Identity (`id`, `location`) and the broker endpoint are immutable for
/// the lifetime of a broker session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MinionConfig {
    /// Stable per-agent identifier (SystemId on the wire)
    pub id: String,
    /// Logical partition the server routes RPC requests by
    pub location: String,
    /// Broker endpoint, `host:port`
    pub broker_url: String,
    /// Which transport variant to use
    pub broker_type: BrokerType,
    /// Transport tunables: TLS paths, topic prefix, chunk sizes, ...
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub broker_properties: HashMap<String, String>,
    /// SNMP trap listener port
    pub trap_port: u16,
    /// Syslog listener port
    pub syslog_port: u16,
    /// Port for the local stats endpoint; disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_port: Option<u16>,
    /// Trace agent endpoint; carried for the tracing surface, unused by the core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_agent: Option<String>,
    /// Flow/telemetry listeners
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,
}

impl Default for MinionConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            location: "Local".into(),
            broker_url: "localhost:8990".into(),
            broker_type: BrokerType::Streaming,
            broker_properties: HashMap::new(),
            trap_port: DEFAULT_TRAP_PORT,
            syslog_port: DEFAULT_SYSLOG_PORT,
            stats_port: None,
            trace_agent: None,
            listeners: Vec::new(),
        }
    }
}

impl MinionConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        contents.parse()
    }

    /// Check the invariants a broker session depends on.
    ///
    /// Identity fields must be non-empty and listener names/ports unique.
    pub fn is_valid(&self) -> ConfigResult<()> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField { field: "id" });
        }
        if self.location.is_empty() {
            return Err(ConfigError::MissingField { field: "location" });
        }
        if self.broker_url.is_empty() {
            return Err(ConfigError::MissingField { field: "brokerUrl" });
        }
        for (i, listener) in self.listeners.iter().enumerate() {
            for other in &self.listeners[i + 1..] {
                if listener.name == other.name {
                    return Err(ConfigError::DuplicateListener {
                        name: listener.name.clone(),
                    });
                }
                if listener.port == other.port {
                    return Err(ConfigError::DuplicatePort {
                        port: listener.port,
                        first: listener.name.clone(),
                        second: other.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Get a listener by its configured name
    pub fn get_listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }

    /// Get the listener whose parser's final dotted segment is `parser`.
    ///
    /// Server-side configuration ships fully qualified class names; modules
    /// look themselves up by the simple name.
    pub fn get_listener_by_parser(&self, parser: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.parser_class() == parser)
    }

    /// Merge `Name,Port,Parser` flag entries into the listener table.
    ///
    /// Malformed entries are rejected individually and returned so the
    /// caller can log them; well-formed entries are still added. A
    /// duplicate listener name is a hard error.
    pub fn parse_listeners<S: AsRef<str>>(
        &mut self,
        entries: &[S],
    ) -> ConfigResult<Vec<ConfigError>> {
        let mut rejected = Vec::new();
        for entry in entries {
            match Listener::parse_flag(entry.as_ref()) {
                Ok(listener) => {
                    if self.get_listener(&listener.name).is_some() {
                        return Err(ConfigError::DuplicateListener {
                            name: listener.name,
                        });
                    }
                    self.listeners.push(listener);
                }
                Err(e) => rejected.push(e),
            }
        }
        Ok(rejected)
    }

    /// Look up a broker property
    pub fn broker_property(&self, key: &str) -> Option<&str> {
        self.broker_properties.get(key).map(String::as_str)
    }

    /// Look up a broker property with a fallback
    pub fn broker_property_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.broker_property(key).unwrap_or(default)
    }

    /// Whether the `tls-enabled` broker property is set to `"true"`
    pub fn tls_enabled(&self) -> bool {
        self.broker_property("tls-enabled") == Some("true")
    }
}

impl FromStr for MinionConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        let config: MinionConfig = serde_yaml::from_str(s)?;
        Ok(config)
    }
}

impl fmt::Display for MinionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_yaml::to_string(self) {
            Ok(yaml) => f.write_str(yaml.trim_end()),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MinionConfig::default();
        assert_eq!(config.location, "Local");
        assert_eq!(config.broker_url, "localhost:8990");
        assert_eq!(config.broker_type, BrokerType::Streaming);
        assert_eq!(config.trap_port, DEFAULT_TRAP_PORT);
        assert_eq!(config.syslog_port, DEFAULT_SYSLOG_PORT);
        assert!(config.is_valid().is_err()); // id is required
    }

    #[test]
    fn test_yaml_with_listeners() {
        let yaml = r#"
id: go-minion1
location: Test
brokerUrl: 10.0.0.100:8990
brokerProperties:
  tls-enabled: "true"
listeners:
- name: Netflow-5
  parser: Netflow5UdpParser
  port: 18877
  properties:
    workers: "4"
- name: Netflow-9
  parser: Netflow9UdpParser
  port: 14729
"#;
        let config: MinionConfig = yaml.parse().unwrap();
        config.is_valid().unwrap();

        assert_eq!(config.id, "go-minion1");
        assert_eq!(config.location, "Test");
        assert!(config.tls_enabled());
        assert_eq!(config.get_listener("Netflow-5").unwrap().port, 18877);
        assert_eq!(
            config.get_listener_by_parser("Netflow9UdpParser").unwrap().port,
            14729
        );
        assert_eq!(
            config.get_listener("Netflow-5").unwrap().property("workers"),
            Some("4")
        );
        assert!(config.get_listener("SFlow").is_none());
    }

    #[test]
    fn test_listener_flags_reject_malformed_entries() {
        let mut config = MinionConfig {
            id: "minion01".into(),
            ..Default::default()
        };
        let rejected = config
            .parse_listeners(&[
                "Graphite,12003,ForwardParser",
                "NXOS,50000,NxosGrpcParser",
                "Wrong1,1000",
                "Wrong2,1001",
            ])
            .unwrap();

        assert_eq!(config.listeners.len(), 2);
        assert_eq!(rejected.len(), 2);
        assert!(rejected
            .iter()
            .all(|e| matches!(e, ConfigError::MalformedListener { .. })));
        assert_eq!(
            config.get_listener("Graphite").unwrap().parser_class(),
            "ForwardParser"
        );
        assert_eq!(config.get_listener("NXOS").unwrap().port, 50000);
    }

    #[test]
    fn test_listener_flag_duplicate_name_is_hard_error() {
        let mut config = MinionConfig::default();
        config
            .parse_listeners(&["Graphite,12003,ForwardParser"])
            .unwrap();
        let err = config
            .parse_listeners(&["Graphite,13003,ForwardParser"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateListener { .. }));
    }

    #[test]
    fn test_listener_flag_bad_port_is_malformed() {
        assert!(matches!(
            Listener::parse_flag("NXOS,not-a-port,NxosGrpcParser"),
            Err(ConfigError::MalformedListener { .. })
        ));
    }

    #[test]
    fn test_parser_class_strips_package() {
        let listener = Listener {
            parser: "org.opennms.netmgt.telemetry.parsers.NxosGrpcParser".into(),
            ..Default::default()
        };
        assert_eq!(listener.parser_class(), "NxosGrpcParser");

        let mut config = MinionConfig::default();
        config.listeners.push(listener);
        assert!(config.get_listener_by_parser("NxosGrpcParser").is_some());
        assert!(config.get_listener_by_parser("SomethingElse").is_none());
    }

    #[test]
    fn test_duplicate_listener_name_invalid() {
        let mut config = MinionConfig {
            id: "minion01".into(),
            ..Default::default()
        };
        for port in [1000u16, 1001] {
            config.listeners.push(Listener {
                name: "Dup".into(),
                parser: "ForwardParser".into(),
                port,
                properties: HashMap::new(),
            });
        }
        assert!(matches!(
            config.is_valid(),
            Err(ConfigError::DuplicateListener { .. })
        ));
    }

    #[test]
    fn test_duplicate_listener_port_invalid() {
        let mut config = MinionConfig {
            id: "minion01".into(),
            ..Default::default()
        };
        for name in ["A", "B"] {
            config.listeners.push(Listener {
                name: name.into(),
                parser: "ForwardParser".into(),
                port: 2000,
                properties: HashMap::new(),
            });
        }
        assert!(matches!(
            config.is_valid(),
            Err(ConfigError::DuplicatePort { port: 2000, .. })
        ));
    }

    #[test]
    fn test_broker_type_from_str() {
        assert_eq!("streaming".parse::<BrokerType>().unwrap(), BrokerType::Streaming);
        assert_eq!("PubSub".parse::<BrokerType>().unwrap(), BrokerType::PubSub);
        assert!(matches!(
            "kafka".parse::<BrokerType>(),
            Err(ConfigError::UnknownBrokerType { .. })
        ));
    }

    #[test]
    fn test_display_renders_yaml() {
        let config = MinionConfig {
            id: "minion01".into(),
            ..Default::default()
        };
        let rendered = config.to_string();
        assert!(rendered.contains("id: minion01"));
        assert!(rendered.contains("brokerType: streaming"));
    }
}
