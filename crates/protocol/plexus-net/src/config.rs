//! Network configuration.
//!
//! This module defines configuration options for the network layer.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use plexus_crypto::{Keypair, PeerId};
use plexus_types::constants::{
    BOOTSTRAP_INTERVAL_MS, DEFAULT_MAX_BUFFERED_BYTES, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_STREAMS, DEFAULT_OUTBOUND_QUEUE, DIAL_TIMEOUT_MS, GOSSIP_DISCOVERY_INTERVAL_MS,
    GOSSIP_DISCOVERY_TOPIC, HANDSHAKE_TIMEOUT_MS, LOCAL_BROADCAST_INTERVAL_MS,
    NEGOTIATION_TIMEOUT_MS, SEEN_CAPACITY, SEEN_TTL_MS, SUBSCRIBER_QUEUE,
};
use plexus_types::{Multiaddr, Protocol, Topic};

/// Capacity of the per-node event queue.
pub const DEFAULT_EVENT_QUEUE: usize = 1024;

/// Configuration for the network layer.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Addresses to listen on.
    ///
    /// Default: `["/ip4/0.0.0.0/tcp/0"]` (random port).
    pub listen_addresses: Vec<Multiaddr>,

    /// Long-term identity. A fresh one is generated when unset.
    pub identity: Option<Keypair>,

    /// Timeout for establishing the raw transport connection.
    ///
    /// Default: 10 seconds.
    pub dial_timeout: Duration,

    /// Timeout for the secure-channel handshake.
    ///
    /// Default: 10 seconds.
    pub handshake_timeout: Duration,

    /// Timeout for per-stream protocol negotiation.
    ///
    /// Default: 5 seconds.
    pub negotiation_timeout: Duration,

    /// Maximum simultaneous connections. Inbound connections beyond the cap
    /// are dropped.
    ///
    /// Default: 256.
    pub max_connections: usize,

    /// Whether to dial peers reported by discovery.
    ///
    /// Default: true.
    pub auto_dial: bool,

    /// Event queue capacity. Slow receivers skip missed events.
    pub event_queue: usize,

    pub mux: MuxConfig,
    pub pubsub: PubSubConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec![Multiaddr::empty()
                .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
                .with(Protocol::Tcp(0))],
            identity: None,
            dial_timeout: Duration::from_millis(DIAL_TIMEOUT_MS),
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            negotiation_timeout: Duration::from_millis(NEGOTIATION_TIMEOUT_MS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_dial: true,
            event_queue: DEFAULT_EVENT_QUEUE,
            mux: MuxConfig::default(),
            pubsub: PubSubConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen addresses.
    pub fn with_listen_addresses(mut self, addresses: Vec<Multiaddr>) -> Self {
        self.listen_addresses = addresses;
        self
    }

    /// Use a fixed identity.
    pub fn with_identity(mut self, identity: Keypair) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Derive a stable identity from a 32-byte secret.
    pub fn with_identity_secret(mut self, secret: [u8; 32]) -> Self {
        self.identity = Some(Keypair::from_secret(secret));
        self
    }

    /// Set dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set negotiation timeout.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set the connection cap.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Enable or disable dialing discovered peers.
    pub fn with_auto_dial(mut self, enable: bool) -> Self {
        self.auto_dial = enable;
        self
    }

    /// Add a bootstrap node.
    pub fn with_bootstrap_node(mut self, peer_id: PeerId, addr: Multiaddr) -> Self {
        self.discovery.bootstrap.push((peer_id, addr));
        self
    }

    /// Replace multiplexer settings.
    pub fn with_mux(mut self, mux: MuxConfig) -> Self {
        self.mux = mux;
        self
    }

    /// Replace pubsub settings.
    pub fn with_pubsub(mut self, pubsub: PubSubConfig) -> Self {
        self.pubsub = pubsub;
        self
    }

    /// Enable local-broadcast discovery over UDP multicast.
    pub fn with_local_broadcast(mut self, config: LocalBroadcastConfig) -> Self {
        self.discovery.local_broadcast = Some(config);
        self
    }

    /// Enable discovery over the pubsub discovery topic.
    pub fn with_gossip_discovery(mut self, config: GossipDiscoveryConfig) -> Self {
        self.discovery.gossip = Some(config);
        self
    }
}

/// Stream multiplexer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxConfig {
    /// Maximum concurrently open inbound streams per connection.
    pub max_streams: usize,
    /// Hard cap on unread bytes buffered per stream.
    pub max_buffered_bytes: usize,
    /// Outbound frame queue depth per connection.
    pub outbound_queue: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// How message ids are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageIdMode {
    /// Hash of origin PeerId and sequence number.
    #[default]
    SourceAndSeqno,
    /// Hash of the payload. Identical payloads are treated as duplicates.
    Payload,
}

/// Flood pubsub settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubConfig {
    /// How long a message id is remembered.
    pub seen_ttl: Duration,
    /// Maximum remembered message ids.
    pub seen_capacity: usize,
    /// Deliver our own publications to local subscribers.
    pub emit_self: bool,
    pub message_id: MessageIdMode,
    /// Queue depth of pull-based subscriptions.
    pub subscriber_queue: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            seen_ttl: Duration::from_millis(SEEN_TTL_MS),
            seen_capacity: SEEN_CAPACITY,
            emit_self: false,
            message_id: MessageIdMode::default(),
            subscriber_queue: SUBSCRIBER_QUEUE,
        }
    }
}

/// Discovery strategies enabled at start.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Static bootstrap list.
    pub bootstrap: Vec<(PeerId, Multiaddr)>,
    pub bootstrap_interval: Duration,
    pub local_broadcast: Option<LocalBroadcastConfig>,
    pub gossip: Option<GossipDiscoveryConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            bootstrap_interval: Duration::from_millis(BOOTSTRAP_INTERVAL_MS),
            local_broadcast: None,
            gossip: None,
        }
    }
}

/// UDP multicast announcement settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalBroadcastConfig {
    pub group: SocketAddr,
    pub interval: Duration,
}

impl Default for LocalBroadcastConfig {
    fn default() -> Self {
        Self {
            group: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 70, 77), 45777)),
            interval: Duration::from_millis(LOCAL_BROADCAST_INTERVAL_MS),
        }
    }
}

/// Pubsub discovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipDiscoveryConfig {
    pub topic: Topic,
    pub interval: Duration,
}

impl Default for GossipDiscoveryConfig {
    fn default() -> Self {
        Self {
            topic: Topic::from(GOSSIP_DISCOVERY_TOPIC),
            interval: Duration::from_millis(GOSSIP_DISCOVERY_INTERVAL_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_types::LOCAL_BROADCAST_GROUP;

    #[test]
    fn test_network_config_defaults() {
        let config = NetworkConfig::default();

        // Listen address: /ip4/0.0.0.0/tcp/0
        assert_eq!(config.listen_addresses.len(), 1);
        let expected_addr: Multiaddr = "/ip4/0.0.0.0/tcp/0".parse().unwrap();
        assert_eq!(config.listen_addresses[0], expected_addr);

        assert!(config.identity.is_none());
        assert_eq!(config.dial_timeout, Duration::from_secs(10));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.negotiation_timeout, Duration::from_secs(5));
        assert_eq!(config.max_connections, 256);
        assert!(config.auto_dial);

        assert_eq!(config.mux.max_streams, 512);
        assert_eq!(config.mux.max_buffered_bytes, 1024 * 1024);
        assert_eq!(config.mux.outbound_queue, 64);

        assert_eq!(config.pubsub.seen_ttl, Duration::from_secs(120));
        assert_eq!(config.pubsub.seen_capacity, 10_000);
        assert!(!config.pubsub.emit_self);
        assert_eq!(config.pubsub.message_id, MessageIdMode::SourceAndSeqno);

        assert!(config.discovery.bootstrap.is_empty());
        assert_eq!(config.discovery.bootstrap_interval, Duration::from_secs(60));
        assert!(config.discovery.local_broadcast.is_none());
        assert!(config.discovery.gossip.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = NetworkConfig::new()
            .with_dial_timeout(Duration::from_secs(2))
            .with_negotiation_timeout(Duration::from_millis(250))
            .with_max_connections(8)
            .with_auto_dial(false);

        assert_eq!(config.dial_timeout.as_secs(), 2);
        assert_eq!(config.negotiation_timeout.as_millis(), 250);
        assert_eq!(config.max_connections, 8);
        assert!(!config.auto_dial);

        // Other defaults should remain unchanged
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_identity_secret_is_stable() {
        let a = NetworkConfig::new().with_identity_secret([3u8; 32]);
        let b = NetworkConfig::new().with_identity_secret([3u8; 32]);
        assert_eq!(
            a.identity.map(|k| k.peer_id()),
            b.identity.map(|k| k.peer_id())
        );
    }

    #[test]
    fn test_add_bootstrap_node() {
        let peer_id = Keypair::generate().peer_id();
        let addr: Multiaddr = "/ip4/192.168.1.1/tcp/9000".parse().unwrap();

        let config = NetworkConfig::new().with_bootstrap_node(peer_id, addr.clone());

        assert_eq!(config.discovery.bootstrap.len(), 1);
        assert_eq!(config.discovery.bootstrap[0].0, peer_id);
        assert_eq!(config.discovery.bootstrap[0].1, addr);
    }

    #[test]
    fn test_discovery_defaults() {
        let local = LocalBroadcastConfig::default();
        assert_eq!(local.group, LOCAL_BROADCAST_GROUP.parse::<SocketAddr>().unwrap());
        assert_eq!(local.interval, Duration::from_secs(20));

        let gossip = GossipDiscoveryConfig::default();
        assert_eq!(gossip.topic.as_str(), "_peer-discovery._p2p._pubsub");
        assert_eq!(gossip.interval, Duration::from_secs(1));

        let config = NetworkConfig::new()
            .with_local_broadcast(local)
            .with_gossip_discovery(gossip);
        assert!(config.discovery.local_broadcast.is_some());
        assert!(config.discovery.gossip.is_some());
    }
}
