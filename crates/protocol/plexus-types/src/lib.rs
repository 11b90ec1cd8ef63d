//! Data structures for the Plexus overlay.
//!
//! This crate provides the plain data types shared by the wire codecs and the
//! networking layer. It contains no I/O, only type definitions with
//! serialization support.
//!
//! # Module Organization
//!
//! - [`constants`] - Protocol constants (identifiers, limits, timing)
//! - [`protocol`] - Versioned protocol identifiers
//! - [`topic`] - Pubsub topics and connection direction
//! - [`error`] - Parsing errors
//!
//! # Example
//!
//! ```
//! use plexus_types::{Multiaddr, ProtocolId, Topic, FLOODSUB_PROTOCOL};
//!
//! let floodsub: ProtocolId = FLOODSUB_PROTOCOL.parse().unwrap();
//! assert_eq!(floodsub.name(), "/floodsub");
//!
//! let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
//! let topic = Topic::from("news");
//! assert_eq!(topic.as_str(), "news");
//! assert_eq!(addr.iter().count(), 2);
//! ```
//!
//! # Type Conventions
//!
//! - Derive `Debug`, `Clone`, `PartialEq`, `Eq` where appropriate
//! - Identifiers serialize as their canonical string form
//! - Use `#[serde(rename_all = "snake_case")]` for enums

/// Protocol version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod constants;
pub mod error;
pub mod protocol;
pub mod topic;

// Constants
pub use constants::*;

// Error types
pub use error::ProtocolIdError;

// Identifiers
pub use protocol::{ProtocolId, Version};
pub use topic::{Direction, Topic};

// Addressing
pub use multiaddr::{self, Multiaddr, Protocol};

// Re-export crypto types that are commonly used with types
pub use plexus_crypto::{Hash, PeerId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_protocols_parse() {
        let floodsub: ProtocolId = FLOODSUB_PROTOCOL.parse().unwrap();
        assert_eq!(floodsub.version(), Some(Version::new(1, 0, 0)));

        let ping: ProtocolId = PING_PROTOCOL.parse().unwrap();
        assert_eq!(ping.name(), "/ipfs/ping");

        let header: ProtocolId = MULTISTREAM_PROTOCOL.parse().unwrap();
        assert_eq!(header.name(), "/multistream");
    }

    #[test]
    fn test_multiaddr_segments() {
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let segments: Vec<Protocol<'_>> = addr.iter().collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], Protocol::Tcp(4001));
    }

    #[test]
    fn test_multiaddr_structural_equality() {
        let a: Multiaddr = "/memory/7".parse().unwrap();
        let b = Multiaddr::empty().with(Protocol::Memory(7));
        assert_eq!(a, b);
    }
}
