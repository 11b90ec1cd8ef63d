//! Error types for plexus-types.

use thiserror::Error;

/// Reasons a string is not a usable protocol identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolIdError {
    /// The identifier is empty.
    #[error("protocol id is empty")]
    Empty,

    /// Identifiers must start with `/`.
    #[error("protocol id must start with '/': {0}")]
    MissingLeadingSlash(String),

    /// Whitespace and control characters would break line-based negotiation.
    #[error("protocol id contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// The identifier does not fit in one negotiation message.
    #[error("protocol id longer than {max} bytes")]
    TooLong { max: usize },
}
