//! Encoding and decoding errors.

use thiserror::Error;

/// Errors raised while encoding a value for the wire.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// CBOR serialization failed.
    #[error("CBOR encoding failed: {0}")]
    Cbor(String),

    /// The encoded value exceeds the frame limit.
    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// A text field cannot be carried by the line codec.
    #[error("invalid negotiation line: {0}")]
    InvalidLine(String),
}

impl<T: std::fmt::Debug> From<ciborium::ser::Error<T>> for EncodeError {
    fn from(e: ciborium::ser::Error<T>) -> Self {
        EncodeError::Cbor(format!("{:?}", e))
    }
}

/// Errors raised while decoding bytes from the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Fewer bytes than the format requires.
    #[error("truncated message: expected {expected} bytes, got {got}")]
    TruncatedMessage { expected: usize, got: usize },

    /// Unexpected magic byte.
    #[error("invalid magic byte: expected {expected:#04x}, got {got:#04x}")]
    InvalidMagic { expected: u8, got: u8 },

    /// Unsupported format version.
    #[error("unsupported version: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    /// Unknown multiplexer frame kind.
    #[error("invalid frame kind: {0}")]
    InvalidFrameKind(u8),

    /// Length prefix exceeds the limit for this message type.
    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Negotiation message is not newline-terminated UTF-8.
    #[error("invalid negotiation line: {0}")]
    InvalidLine(String),

    /// CBOR payload could not be decoded.
    #[error("payload decode failed: {0}")]
    PayloadDecodeFailed(String),

    /// A signed structure did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// An embedded address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
