//! Error types for configuration and the broker handle

use thiserror::Error;

/// Errors that make a configuration unusable
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the YAML document
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required identity field is empty
    #[error("required field '{field}' is empty")]
    MissingField {
        /// Name of the missing field
        field: &'static str,
    },

    /// Broker type does not resolve to a known transport
    #[error("unknown broker type '{broker_type}' (expected 'streaming' or 'pubsub')")]
    UnknownBrokerType {
        /// The offending value
        broker_type: String,
    },

    /// Two listeners share a name
    #[error("duplicate listener name '{name}'")]
    DuplicateListener {
        /// The conflicting name
        name: String,
    },

    /// Two listeners share a port
    #[error("port {port} is used by listeners '{first}' and '{second}'")]
    DuplicatePort {
        /// The conflicting port
        port: u16,
        /// First listener on the port
        first: String,
        /// Second listener on the port
        second: String,
    },

    /// A listener flag that does not follow `Name,Port,Parser`
    #[error("malformed listener '{entry}': expected Name,Port,Parser")]
    MalformedListener {
        /// The raw flag value
        entry: String,
    },
}

/// Errors raised by a module's `start`
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Failed to bind a listener socket
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The module's configuration is unusable
    #[error("module configuration invalid: {reason}")]
    Config {
        /// What is wrong
        reason: String,
    },

    /// Other IO failure during startup
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by `Broker::send`
#[derive(Debug, Error)]
pub enum SendError {
    /// The transport is not connected and could not be re-established
    #[error("broker transport unavailable: {reason}")]
    Unavailable {
        /// Why the transport is down
        reason: String,
    },

    /// The message could not be written to the transport
    #[error("failed to deliver sink message for module {module_id}: {reason}")]
    Delivery {
        /// Module whose message was lost
        module_id: String,
        /// Transport-level failure description
        reason: String,
    },

    /// The broker is shutting down
    #[error("broker is stopped")]
    Stopped,
}
