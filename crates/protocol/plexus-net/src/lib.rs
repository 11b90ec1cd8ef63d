//! P2P networking for plexus.
//!
//! This crate provides the connection-oriented core of a plexus node:
//!
//! - **Transports**: raw duplex connections over TCP or an in-process hub
//! - **Secure channel**: signed X25519 handshake, AES-256-GCM framing
//! - **Stream multiplexing**: many ordered, independently buffered streams
//!   per connection
//! - **Protocol negotiation**: multistream-style agreement on a versioned
//!   protocol id for every stream
//! - **Connection management**: dial/accept lifecycle, duplicate
//!   reconciliation and connect/disconnect events
//! - **Flood pubsub**: topic subscriptions with duplicate suppression
//! - **Discovery**: static bootstrap, local broadcast and pubsub gossip
//!
//! # Overview
//!
//! The stack on every connection is:
//!
//! - **Transport**: TCP (`/ip4/.../tcp/<port>`) or memory (`/memory/<port>`)
//! - **Security**: Ed25519 identities, ephemeral X25519 key agreement
//! - **Muxer**: length-delimited frames tagged with a stream id
//! - **Negotiation**: `/multistream/1.0.0` header, then proposals in order
//!
//! # Example
//!
//! ```no_run
//! use plexus_net::{NetworkConfig, NetworkEvent, Node};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::tcp(NetworkConfig::default())?;
//!     node.start().await?;
//!
//!     node.pubsub().subscribe("news", |message| {
//!         println!("{}", String::from_utf8_lossy(&message.data));
//!     });
//!
//!     let mut events = node.subscribe_events();
//!     while let Some(event) = events.recv().await {
//!         if let NetworkEvent::PeerConnected { peer } = event {
//!             println!("connected to {}", peer);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Protocol handlers
//!
//! Handlers receive the stream together with the single protocol id both
//! sides agreed on:
//!
//! ```no_run
//! use plexus_net::{InboundStream, Node};
//! use plexus_types::ProtocolId;
//!
//! fn register(node: &Node) -> Result<(), Box<dyn std::error::Error>> {
//!     let ids: Vec<ProtocolId> = vec!["/echo/1.0.0".parse()?, "/echo/2.0.0".parse()?];
//!     node.handle(ids, |mut inbound: InboundStream| async move {
//!         if let Ok(bytes) = inbound.stream.read_to_end().await {
//!             let _ = inbound.stream.write(&bytes).await;
//!         }
//!         let _ = inbound.stream.close_write().await;
//!     });
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod event;
pub mod muxer;
pub mod negotiate;
pub mod node;
pub mod peer_store;
pub mod pubsub;
pub mod secure;
pub mod transport;

mod ping;

#[cfg(test)]
mod test_support;

// Configuration
pub use config::{
    DiscoveryConfig, GossipDiscoveryConfig, LocalBroadcastConfig, MessageIdMode, MuxConfig,
    NetworkConfig, PubSubConfig,
};

// Error types
pub use error::{ErrorScope, HandshakeError, NetworkError, NetworkResult};

// Event types
pub use event::{EventReceiver, NetworkEvent};

// Node and its parts
pub use connection::{Connection, ConnectionId, ConnectionManager, PeerState};
pub use muxer::{Stream, StreamState};
pub use negotiate::{HandlerRegistry, InboundStream};
pub use node::Node;
pub use peer_store::AddressBook;
pub use pubsub::{Message, MessageId, PubSub, Subscription, SubscriptionId};

// Discovery
pub use discovery::{
    BroadcastMedium, DiscoveryContext, DiscoveryStrategy, GossipDiscovery, LocalBroadcast,
    MemoryMedium, StaticBootstrap, UdpMulticastMedium,
};

// Transports
pub use transport::{MemoryHub, MemoryTransport, TcpTransport, Transport};

// Re-export types commonly needed alongside the node
pub use plexus_crypto::{Keypair, PeerId};
pub use plexus_types::{Multiaddr, ProtocolId, Topic};
