//! Error types for Meshwork overlay operations.

use std::fmt;

use thiserror::Error;

use crate::address::PeerAddress;

/// Long-running node components that can be started and stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// The inbound RPC server.
    Server,
    /// The periodic peer discovery loop.
    Discovery,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Server => write!(f, "server"),
            Service::Discovery => write!(f, "discovery"),
        }
    }
}

/// Errors that can occur during overlay operations.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Network transport error (unreachable peer, failed RPC).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The network event loop is gone, the node has been shut down.
    #[error("Network event loop is not running")]
    EventLoopClosed,

    /// The address is not in the peer set.
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerAddress),

    /// The address could not be parsed.
    #[error("Invalid peer address '{input}': {reason}")]
    InvalidAddress {
        /// Raw input
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// Node identity could not be derived.
    #[error("Identity error: {0}")]
    Identity(String),

    /// The remote answered with something we did not ask for.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Payload encoding/decoding error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Start requested for a component that is already running.
    #[error("The {0} is already running")]
    AlreadyRunning(Service),

    /// Stop requested for a component that is not running.
    #[error("The {0} is not running")]
    NotRunning(Service),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverlayError {
    /// Whether this error came from talking to a remote peer.
    ///
    /// Transport errors are never fatal: discovery skips the peer for the
    /// round and broadcast skips the relay target.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            OverlayError::NetworkError(_) | OverlayError::Timeout | OverlayError::EventLoopClosed
        )
    }
}

/// Result type alias for overlay operations.
pub type Result<T> = std::result::Result<T, OverlayError>;
