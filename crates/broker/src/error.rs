//! Broker error types

use thiserror::Error;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised by broker transports
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not reach the server within the startup window
    #[error("could not reach broker at {url} within {timeout_secs}s")]
    DialTimeout {
        /// Broker endpoint
        url: String,
        /// Overall startup timeout
        timeout_secs: u64,
    },

    /// A single connection attempt failed
    #[error("cannot dial broker at {url}: {source}")]
    Dial {
        /// Broker endpoint
        url: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TLS configuration or handshake failure
    #[error("TLS error: {reason}")]
    Tls {
        /// What went wrong
        reason: String,
    },

    /// The peer sent a frame this agent cannot accept
    #[error("bad frame: {reason}")]
    BadFrame {
        /// What was wrong with the frame
        reason: String,
    },

    /// Frame payload beyond the transport ceiling
    #[error("frame payload of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared payload size
        size: u32,
        /// Allowed maximum
        max: u32,
    },

    /// Envelope encode/decode failure
    #[error(transparent)]
    Codec(#[from] minion_ipc::CodecError),

    /// Messaging client failure (connect, subscribe, publish)
    #[error("pubsub client error: {reason}")]
    PubSub {
        /// Client failure description
        reason: String,
    },

    /// The transport is not connected
    #[error("broker session is not established")]
    NotConnected,

    /// Transport-level IO failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
