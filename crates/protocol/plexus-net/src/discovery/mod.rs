//! Peer discovery.
//!
//! Each [`DiscoveryStrategy`] runs as its own task and reports peers through
//! its [`DiscoveryContext`]. Reported addresses land in the address book
//! before the `PeerDiscovered` event goes out, so observers can dial right
//! away. Discovery is best-effort: strategies log their errors and keep
//! going.
//!
//! Built-in strategies:
//!
//! - [`StaticBootstrap`]: a fixed list of known peers
//! - [`LocalBroadcast`]: signed announcements on a local broadcast medium
//! - [`GossipDiscovery`]: signed announcements on a pubsub topic

mod bootstrap;
mod broadcast;
mod gossip;

pub use bootstrap::StaticBootstrap;
pub use broadcast::{BroadcastMedium, LocalBroadcast, MemoryMedium, UdpMulticastMedium};
pub use gossip::GossipDiscovery;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use plexus_crypto::{Keypair, PeerId};
use plexus_types::Multiaddr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::event::{EventSender, NetworkEvent};
use crate::peer_store::AddressBook;
use crate::pubsub::PubSub;

/// A pluggable way of learning about peers.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Run until `ctx` is cancelled.
    async fn run(&self, ctx: DiscoveryContext);
}

/// What a strategy can see and do while running.
#[derive(Clone)]
pub struct DiscoveryContext {
    identity: Keypair,
    address_book: AddressBook,
    events: EventSender,
    connections: ConnectionManager,
    pubsub: PubSub,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DiscoveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryContext")
            .field("local_peer", &self.local_peer())
            .finish()
    }
}

impl DiscoveryContext {
    pub(crate) fn new(
        identity: Keypair,
        address_book: AddressBook,
        events: EventSender,
        connections: ConnectionManager,
        pubsub: PubSub,
        listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            identity,
            address_book,
            events,
            connections,
            pubsub,
            listen_addrs,
            shutdown,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// The node identity, for signing announcements.
    pub fn identity(&self) -> &Keypair {
        &self.identity
    }

    /// Addresses the node currently listens on.
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs
            .read()
            .map(|addrs| addrs.clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connections.is_connected(peer)
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    /// Report a peer. Self-reports and empty address lists are ignored.
    pub fn discovered(&self, peer: PeerId, addresses: Vec<Multiaddr>) {
        if peer == self.local_peer() || addresses.is_empty() {
            return;
        }
        self.address_book.add(peer, addresses.iter().cloned());
        debug!(peer = %peer, addresses = addresses.len(), "Peer discovered");
        self.events
            .emit(NetworkEvent::PeerDiscovered { peer, addresses });
    }

    /// Resolves once the node stops.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Runs the registered strategies while the node is started.
#[derive(Default)]
pub(crate) struct DiscoveryEngine {
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    context: Option<DiscoveryContext>,
}

impl DiscoveryEngine {
    /// Register a strategy, starting it at once if the engine runs.
    pub(crate) fn add(&mut self, strategy: Arc<dyn DiscoveryStrategy>) {
        if let Some(ctx) = &self.context {
            spawn(Arc::clone(&strategy), ctx.clone());
        }
        self.strategies.push(strategy);
    }

    pub(crate) fn start(&mut self, ctx: DiscoveryContext) {
        for strategy in &self.strategies {
            spawn(Arc::clone(strategy), ctx.clone());
        }
        self.context = Some(ctx);
    }

    /// Forget the running context. The strategies stop through its
    /// cancellation token.
    pub(crate) fn stop(&mut self) {
        self.context = None;
    }

    pub(crate) fn len(&self) -> usize {
        self.strategies.len()
    }
}

fn spawn(strategy: Arc<dyn DiscoveryStrategy>, ctx: DiscoveryContext) {
    tokio::spawn(async move {
        let name = strategy.name();
        debug!(strategy = name, "Discovery started");
        strategy.run(ctx).await;
        debug!(strategy = name, "Discovery stopped");
    });
}
