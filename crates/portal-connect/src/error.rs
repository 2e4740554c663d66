//! Error types for the relay session client

use thiserror::Error;

/// Classification of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The peer forcibly reset the connection
    PeerReset,
    /// The connection is already closed
    Closed,
    /// Any other transport failure
    Other,
}

/// Connection-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    /// The peer reset the connection
    pub fn peer_reset(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::PeerReset,
            message: message.into(),
        }
    }

    /// The connection is closed
    pub fn closed(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Closed,
            message: message.into(),
        }
    }

    /// Any other failure
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }

    /// Check if the peer reset the connection
    pub fn is_peer_reset(&self) -> bool {
        self.kind == TransportErrorKind::PeerReset
    }

    /// Check if this error triggers the automatic reconnect
    pub fn is_retryable(&self) -> bool {
        self.is_peer_reset()
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        use tokio_tungstenite::tungstenite::error::ProtocolError;

        match err {
            WsError::Io(ref e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                TransportError::peer_reset(err.to_string())
            }
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                TransportError::peer_reset(err.to_string())
            }
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::closed(err.to_string())
            }
            other => TransportError::other(other.to_string()),
        }
    }
}

/// Relay session client errors
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Inbound frame matched no known message schema
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// No open connection to write to
    #[error("Not connected to relay")]
    NotConnected,

    /// Operation needs an established dapp session
    #[error("Session not established")]
    SessionNotEstablished,

    /// A bounded wait elapsed
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Request routing failed
    #[error("Provider error: {0}")]
    Provider(#[from] portal_core::Error),
}

impl From<serde_json::Error> for ConnectError {
    fn from(err: serde_json::Error) -> Self {
        ConnectError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConnectError>;
