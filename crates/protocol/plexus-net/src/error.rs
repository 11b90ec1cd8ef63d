//! Network error types.
//!
//! This module defines all error types for the plexus-net crate. Every
//! failure is scoped to the stream, connection, dial, or operation that
//! produced it; see [`NetworkError::scope`].

use std::sync::Arc;

use plexus_crypto::PeerId;
use plexus_wire::{DecodeError, EncodeError};
use thiserror::Error;

/// Why a secure-channel handshake failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The remote hello could not be decoded.
    #[error("malformed handshake message: {0}")]
    Malformed(String),

    /// The remote hello signature did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The remote identity is not the peer we dialed.
    #[error("peer id mismatch: expected {expected}, got {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },

    /// No cipher suite in common.
    #[error("no common cipher suite")]
    UnsupportedCipherSuite,
}

/// Which part of the system a failure is confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// Only the affected logical stream.
    Stream,
    /// Only the affected connection.
    Connection,
    /// Only the dial attempt.
    Dial,
    /// Only the API call that returned it.
    Operation,
}

/// Network-specific errors.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum NetworkError {
    /// Secure-channel handshake failed. Never retried automatically.
    #[error("handshake failed: {0}")]
    HandshakeFailure(#[from] HandshakeError),

    /// Protocol negotiation did not finish in time.
    #[error("protocol negotiation timed out")]
    NegotiationTimeout,

    /// The remote supports none of the proposed protocols.
    #[error("no matching protocol among {proposed:?}")]
    NoMatchingProtocol { proposed: Vec<String> },

    /// The stream's unread buffer exceeded its hard cap.
    #[error("stream overflow: more than {limit} unread bytes")]
    StreamOverflow { limit: usize },

    /// The underlying session closed.
    #[error("session closed")]
    SessionClosed,

    /// The stream was reset by either side.
    #[error("stream reset")]
    StreamReset,

    /// No transport connection could be made.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Transport layer error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Failed to encode message.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode message.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Internal channel closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The address book holds no addresses for the peer.
    #[error("no known addresses for {0}")]
    NoAddresses(PeerId),

    /// The node has not been started.
    #[error("node not started")]
    NotStarted,

    /// The node is already running.
    #[error("node already started")]
    AlreadyStarted,

    /// The connection limit was reached.
    #[error("connection limit reached ({max})")]
    ConnectionLimit { max: usize },

    /// No transport handles this address.
    #[error("unsupported address: {0}")]
    UnsupportedAddress(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Io(Arc::new(e))
    }
}

impl From<EncodeError> for NetworkError {
    fn from(e: EncodeError) -> Self {
        NetworkError::Encoding(e.to_string())
    }
}

impl From<DecodeError> for NetworkError {
    fn from(e: DecodeError) -> Self {
        NetworkError::Decoding(e.to_string())
    }
}

impl NetworkError {
    /// The part of the system this failure is confined to.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::NegotiationTimeout
            | Self::NoMatchingProtocol { .. }
            | Self::StreamOverflow { .. }
            | Self::StreamReset => ErrorScope::Stream,
            Self::SessionClosed
            | Self::Transport(_)
            | Self::Encoding(_)
            | Self::Decoding(_)
            | Self::Io(_) => ErrorScope::Connection,
            Self::HandshakeFailure(_)
            | Self::Unreachable(_)
            | Self::NoAddresses(_)
            | Self::ConnectionLimit { .. }
            | Self::UnsupportedAddress(_) => ErrorScope::Dial,
            Self::Timeout(_) | Self::ChannelClosed | Self::NotStarted | Self::AlreadyStarted => {
                ErrorScope::Operation
            }
        }
    }

    /// Get a user-friendly suggestion for recovering from this error.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::HandshakeFailure(HandshakeError::PeerIdMismatch { .. }) => {
                "The remote identity differs from the one dialed. Check the address book entry."
            }
            Self::HandshakeFailure(_) => {
                "Secure handshake failed. The peer may run an incompatible version."
            }
            Self::NegotiationTimeout => {
                "The peer did not answer protocol negotiation in time. It may be overloaded."
            }
            Self::NoMatchingProtocol { .. } => {
                "The peer supports none of the proposed protocols. Check handler registration."
            }
            Self::StreamOverflow { .. } => {
                "The stream reader fell too far behind. Read more often or raise max_buffered_bytes."
            }
            Self::SessionClosed | Self::StreamReset => {
                "The connection or stream was closed. Dial again to continue."
            }
            Self::Unreachable(_) | Self::Transport(_) => {
                "Check network connectivity. Verify the peer address is reachable."
            }
            Self::Timeout(_) => {
                "The operation timed out. Try again or increase the timeout. Check if the peer is online."
            }
            Self::Encoding(_) | Self::Decoding(_) => {
                "Message encoding/decoding failed. This may indicate a protocol version mismatch."
            }
            Self::ChannelClosed => {
                "Internal channel closed. The node may have stopped. Restart the node."
            }
            Self::NoAddresses(_) => {
                "No addresses known for this peer. Add one to the address book or wait for discovery."
            }
            Self::NotStarted => "Node is not started. Call start() first.",
            Self::AlreadyStarted => "Node is already running. Call stop() before restarting.",
            Self::ConnectionLimit { .. } => {
                "Too many open connections. Hang up idle peers or raise max_connections."
            }
            Self::UnsupportedAddress(_) => {
                "No transport supports this address. Use a /tcp or /memory multiaddr."
            }
            Self::Io(_) => "I/O error. Check socket permissions and port availability.",
        }
    }

    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::NegotiationTimeout
                | Self::Unreachable(_)
                | Self::Transport(_)
                | Self::ChannelClosed
                | Self::SessionClosed
                | Self::ConnectionLimit { .. }
        )
    }

    /// Suggested retry delay in milliseconds for transient errors.
    ///
    /// Returns `None` for non-transient errors. This crate never retries on
    /// its own; the hint is for callers and discovery strategies.
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout(_) => Some(5_000),
            Self::NegotiationTimeout => Some(2_000),
            Self::Unreachable(_) | Self::Transport(_) => Some(3_000),
            Self::ChannelClosed | Self::SessionClosed => Some(1_000),
            Self::ConnectionLimit { .. } => Some(10_000),
            _ => None,
        }
    }
}

/// Result type alias using NetworkError.
pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::Transport("connection reset".to_string());
        assert_eq!(format!("{}", err), "transport error: connection reset");

        let err = NetworkError::StreamOverflow { limit: 1024 };
        assert_eq!(
            format!("{}", err),
            "stream overflow: more than 1024 unread bytes"
        );

        let err = NetworkError::from(HandshakeError::UnsupportedCipherSuite);
        assert_eq!(format!("{}", err), "handshake failed: no common cipher suite");
    }

    #[test]
    fn test_scope_follows_propagation_policy() {
        assert_eq!(NetworkError::NegotiationTimeout.scope(), ErrorScope::Stream);
        assert_eq!(
            NetworkError::NoMatchingProtocol { proposed: vec![] }.scope(),
            ErrorScope::Stream
        );
        assert_eq!(
            NetworkError::StreamOverflow { limit: 1 }.scope(),
            ErrorScope::Stream
        );
        assert_eq!(NetworkError::SessionClosed.scope(), ErrorScope::Connection);
        assert_eq!(
            NetworkError::Unreachable("x".into()).scope(),
            ErrorScope::Dial
        );
        assert_eq!(
            NetworkError::from(HandshakeError::AuthenticationFailed).scope(),
            ErrorScope::Dial
        );
        assert_eq!(NetworkError::NotStarted.scope(), ErrorScope::Operation);
    }

    #[test]
    fn test_is_transient() {
        assert!(NetworkError::Timeout("test".into()).is_transient());
        assert!(NetworkError::Unreachable("test".into()).is_transient());
        assert!(NetworkError::NegotiationTimeout.is_transient());

        assert!(!NetworkError::from(HandshakeError::AuthenticationFailed).is_transient());
        assert!(!NetworkError::NoMatchingProtocol { proposed: vec![] }.is_transient());
        assert!(!NetworkError::Encoding("test".into()).is_transient());
    }

    #[test]
    fn test_retry_delay() {
        assert_eq!(
            NetworkError::Timeout("test".into()).retry_delay_ms(),
            Some(5_000)
        );
        assert_eq!(
            NetworkError::Unreachable("test".into()).retry_delay_ms(),
            Some(3_000)
        );
        assert_eq!(NetworkError::NotStarted.retry_delay_ms(), None);
        assert_eq!(
            NetworkError::from(HandshakeError::UnsupportedCipherSuite).retry_delay_ms(),
            None
        );
    }

    #[test]
    fn test_suggestion() {
        let err = NetworkError::Timeout("test".into());
        assert!(err.suggestion().contains("timed out"));

        let err = NetworkError::NotStarted;
        assert!(err.suggestion().contains("start()"));
    }

    #[test]
    fn test_io_error_is_clone() {
        let err = NetworkError::from(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "port taken",
        ));
        let copy = err.clone();
        assert!(format!("{}", copy).contains("port taken"));
    }
}
