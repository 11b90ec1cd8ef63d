//! Network node implementation.
//!
//! A [`Node`] ties together one transport, the connection manager, the
//! protocol handler registry, the flood pubsub router and the discovery
//! engine. Every node owns all of its state, so any number of nodes can run
//! in one process.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use plexus_crypto::{Keypair, PeerId};
use plexus_types::{Multiaddr, ProtocolId, PING_PROTOCOL};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::NetworkConfig;
use crate::connection::{Connection, ConnectionManager};
use crate::discovery::{
    DiscoveryContext, DiscoveryEngine, DiscoveryStrategy, GossipDiscovery, LocalBroadcast,
    StaticBootstrap, UdpMulticastMedium,
};
use crate::error::{NetworkError, NetworkResult};
use crate::event::{EventReceiver, EventSender, NetworkEvent};
use crate::muxer::Stream;
use crate::negotiate::{negotiate_outbound, HandlerRegistry, InboundStream};
use crate::peer_store::AddressBook;
use crate::ping;
use crate::pubsub::PubSub;
use crate::secure::SignedX25519Upgrade;
use crate::transport::{Listener, TcpTransport, Transport};

/// A P2P network node.
///
/// Cloning yields another handle to the same node. The node shuts its
/// background work down when the last handle is dropped.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    config: NetworkConfig,
    identity: Keypair,
    local_peer: PeerId,
    ping_protocol: ProtocolId,
    transport: Arc<dyn Transport>,
    address_book: AddressBook,
    events: EventSender,
    connections: ConnectionManager,
    registry: HandlerRegistry,
    pubsub: PubSub,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    discovery: Mutex<DiscoveryEngine>,
    /// Strategies from the config are installed on the first start.
    builtin_discovery: Mutex<bool>,
    /// Present while the node runs.
    running: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer_id", &self.inner.local_peer)
            .field("started", &self.is_started())
            .field("listen_addrs", &self.listen_addrs())
            .finish()
    }
}

impl Node {
    /// Create a node over `transport`. Nothing touches the network until
    /// [`start`](Self::start).
    pub fn new(config: NetworkConfig, transport: impl Transport) -> NetworkResult<Self> {
        let identity = config.identity.clone().unwrap_or_else(Keypair::generate);
        let local_peer = identity.peer_id();
        info!(peer = %local_peer, "Creating network node");

        let ping_protocol: ProtocolId = PING_PROTOCOL
            .parse()
            .map_err(|e| NetworkError::Encoding(format!("ping protocol id: {}", e)))?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let address_book = AddressBook::new();
        let events = EventSender::new(config.event_queue);
        let connections = ConnectionManager::new(
            identity.clone(),
            Arc::clone(&transport),
            Arc::new(SignedX25519Upgrade::new()),
            address_book.clone(),
            events.clone(),
            &config,
        );
        let pubsub = PubSub::new(local_peer, config.pubsub.clone(), config.negotiation_timeout)?;

        let registry = HandlerRegistry::new();
        registry.register([ping_protocol.clone()], ping::serve);
        let router = pubsub.clone();
        registry.register([pubsub.protocol().clone()], move |inbound: InboundStream| {
            let router = router.clone();
            async move { router.handle_inbound(inbound).await }
        });

        {
            let pubsub = pubsub.clone();
            let registry = registry.clone();
            let timeout = config.negotiation_timeout;
            connections.set_connection_hook(Arc::new(move |conn: Connection| {
                pubsub.add_peer(conn.clone());
                tokio::spawn(accept_streams(conn, registry.clone(), timeout));
            }));
        }

        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                identity,
                local_peer,
                ping_protocol,
                transport,
                address_book,
                events,
                connections,
                registry,
                pubsub,
                listen_addrs: Arc::new(RwLock::new(Vec::new())),
                discovery: Mutex::new(DiscoveryEngine::default()),
                builtin_discovery: Mutex::new(false),
                running: Mutex::new(None),
            }),
        })
    }

    /// Create a node over TCP.
    pub fn tcp(config: NetworkConfig) -> NetworkResult<Self> {
        Self::new(config, TcpTransport::new())
    }

    /// Listen on every configured address and start discovery.
    ///
    /// A `NewListenAddr` event is emitted for each dialable address. A
    /// listener bound to a wildcard host reports one address per interface.
    pub async fn start(&self) -> NetworkResult<()> {
        let shutdown = {
            let mut running = self.inner.running();
            if running.is_some() {
                return Err(NetworkError::AlreadyStarted);
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let listeners = match self.bind_listeners().await {
            Ok(listeners) => listeners,
            Err(e) => {
                shutdown.cancel();
                *self.inner.running() = None;
                return Err(e);
            }
        };

        for listener in listeners {
            for address in listener.listen_addrs() {
                info!(peer = %self.inner.local_peer, address = %address, "Listening");
                self.inner
                    .listen_addrs
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(address.clone());
                self.inner
                    .events
                    .emit(NetworkEvent::NewListenAddr { address });
            }
            tokio::spawn(run_listener(
                listener,
                self.inner.connections.clone(),
                self.inner.events.clone(),
                shutdown.clone(),
            ));
        }

        if self.inner.config.auto_dial {
            tokio::spawn(auto_dial(
                self.inner.events.subscribe(),
                self.inner.connections.clone(),
                shutdown.clone(),
            ));
        }

        self.start_discovery(shutdown);
        Ok(())
    }

    async fn bind_listeners(&self) -> NetworkResult<Vec<Box<dyn Listener>>> {
        let mut listeners = Vec::with_capacity(self.inner.config.listen_addresses.len());
        for addr in &self.inner.config.listen_addresses {
            let listener = self.inner.transport.listen(addr).await.map_err(|e| {
                warn!(address = %addr, error = %e, "Failed to listen");
                e
            })?;
            listeners.push(listener);
        }
        Ok(listeners)
    }

    fn start_discovery(&self, shutdown: CancellationToken) {
        let builtin = {
            let mut installed = self
                .inner
                .builtin_discovery
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *installed {
                Vec::new()
            } else {
                *installed = true;
                self.builtin_strategies()
            }
        };

        let ctx = DiscoveryContext::new(
            self.inner.identity.clone(),
            self.inner.address_book.clone(),
            self.inner.events.clone(),
            self.inner.connections.clone(),
            self.inner.pubsub.clone(),
            Arc::clone(&self.inner.listen_addrs),
            shutdown,
        );

        let mut engine = self.inner.discovery();
        for strategy in builtin {
            engine.add(strategy);
        }
        engine.start(ctx);
        debug!(strategies = engine.len(), "Discovery running");
    }

    fn builtin_strategies(&self) -> Vec<Arc<dyn DiscoveryStrategy>> {
        let discovery = &self.inner.config.discovery;
        let mut strategies: Vec<Arc<dyn DiscoveryStrategy>> = Vec::new();

        if !discovery.bootstrap.is_empty() {
            strategies.push(Arc::new(
                StaticBootstrap::new(discovery.bootstrap.clone())
                    .with_interval(discovery.bootstrap_interval),
            ));
        }

        if let Some(local) = discovery.local_broadcast {
            match UdpMulticastMedium::bind(local.group) {
                Ok(medium) => strategies.push(Arc::new(
                    LocalBroadcast::new(Arc::new(medium)).with_interval(local.interval),
                )),
                // Best effort: the node runs without it.
                Err(e) => warn!(group = %local.group, error = %e, "Local broadcast unavailable"),
            }
        }

        if let Some(gossip) = &discovery.gossip {
            strategies.push(Arc::new(
                GossipDiscovery::new()
                    .with_topic(gossip.topic.clone())
                    .with_interval(gossip.interval),
            ));
        }

        strategies
    }

    /// Stop listening, stop discovery and close every connection.
    pub async fn stop(&self) -> NetworkResult<()> {
        let shutdown = self.inner.running().take().ok_or(NetworkError::NotStarted)?;
        shutdown.cancel();
        self.inner.discovery().stop();
        self.inner.connections.close_all().await;
        self.inner
            .listen_addrs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(peer = %self.inner.local_peer, "Node stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.running().is_some()
    }

    pub fn peer_id(&self) -> PeerId {
        self.inner.local_peer
    }

    pub fn identity(&self) -> &Keypair {
        &self.inner.identity
    }

    /// Addresses currently listened on, with ports resolved.
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.inner
            .listen_addrs
            .read()
            .map(|addrs| addrs.clone())
            .unwrap_or_default()
    }

    /// Serve `protocols` with `handler`.
    ///
    /// The handler is told which single protocol was agreed on.
    pub fn handle<I, F, Fut>(&self, protocols: I, handler: F)
    where
        I: IntoIterator<Item = ProtocolId>,
        F: Fn(InboundStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.registry.register(protocols, handler);
    }

    /// Stop serving `protocol`. Returns whether a handler was registered.
    pub fn unhandle(&self, protocol: &ProtocolId) -> bool {
        self.inner.registry.unregister(protocol)
    }

    /// Protocols this node answers, sorted.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.inner.registry.protocols()
    }

    /// Connect to `peer` using the address book.
    pub async fn dial(&self, peer: PeerId) -> NetworkResult<Connection> {
        self.require_started()?;
        self.inner.connections.dial(peer).await
    }

    /// Connect to whoever listens on `addr`.
    pub async fn dial_addr(&self, addr: &Multiaddr) -> NetworkResult<Connection> {
        self.require_started()?;
        self.inner.connections.dial_addr(addr).await
    }

    /// Connect to `peer` if needed, open a stream and agree on one of
    /// `protocols`, tried in order.
    pub async fn dial_protocol(
        &self,
        peer: PeerId,
        protocols: &[ProtocolId],
    ) -> NetworkResult<Stream> {
        let conn = self.dial(peer).await?;
        let stream = conn.open_stream().await?;
        let (stream, protocol) =
            negotiate_outbound(stream, protocols, self.inner.config.negotiation_timeout).await?;
        debug!(peer = %peer, protocol = %protocol, "Protocol stream opened");
        Ok(stream)
    }

    /// Close the connection to `peer`. Returns whether one was open.
    pub async fn hang_up(&self, peer: &PeerId) -> bool {
        self.inner.connections.disconnect(peer).await
    }

    /// Measure the round-trip time to `peer`.
    pub async fn ping(&self, peer: PeerId) -> NetworkResult<Duration> {
        let protocol = self.inner.ping_protocol.clone();
        let mut stream = self.dial_protocol(peer, &[protocol]).await?;
        let rtt = ping::ping(&mut stream).await?;
        let _ = stream.close_write().await;
        Ok(rtt)
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.inner.pubsub
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.inner.address_book
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// A new receiver for this node's events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.connections.connected_peers()
    }

    /// Register a discovery strategy. It starts at once if the node runs.
    pub fn add_discovery(&self, strategy: impl DiscoveryStrategy) {
        self.inner.discovery().add(Arc::new(strategy));
    }

    fn require_started(&self) -> NetworkResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(NetworkError::NotStarted)
        }
    }
}

impl NodeInner {
    fn running(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn discovery(&self) -> MutexGuard<'_, DiscoveryEngine> {
        self.discovery.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        if let Some(shutdown) = self.running().take() {
            shutdown.cancel();
        }
        for peer in self.connections.connected_peers() {
            if let Some(conn) = self.connections.connection(&peer) {
                conn.close();
            }
        }
    }
}

/// Accept inbound connections until shutdown or listener failure.
async fn run_listener(
    mut listener: Box<dyn Listener>,
    connections: ConnectionManager,
    events: EventSender,
    shutdown: CancellationToken,
) {
    let address = listener.local_addr();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((io, remote)) => {
                    trace!(address = %address, remote = %remote, "Inbound connection");
                    let connections = connections.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = connections.accept(io, remote.clone()) => {
                                if let Err(e) = result {
                                    debug!(remote = %remote, error = %e, "Inbound connection failed");
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Listener failed");
                    break;
                }
            }
        }
    }
    info!(address = %address, "Listener closed");
    events.emit(NetworkEvent::ListenerClosed { address });
}

/// Negotiate and serve every stream the remote opens on `conn`.
async fn accept_streams(conn: Connection, registry: HandlerRegistry, timeout: Duration) {
    loop {
        let stream = match conn.accept_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                trace!(peer = %conn.peer(), connection = conn.id(), error = %e, "Stream accept loop ended");
                return;
            }
        };
        let registry = registry.clone();
        let peer = conn.peer();
        tokio::spawn(async move {
            if let Err(e) = registry.serve(stream, timeout).await {
                debug!(peer = %peer, error = %e, "Inbound stream negotiation failed");
            }
        });
    }
}

/// Dial peers reported by discovery.
async fn auto_dial(
    mut events: EventReceiver,
    connections: ConnectionManager,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Some(NetworkEvent::PeerDiscovered { peer, .. }) => {
                if connections.is_connected(&peer) {
                    continue;
                }
                let connections = connections.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        result = connections.dial(peer) => {
                            // Failures are reported as DialFailed by the manager.
                            if let Err(e) = result {
                                debug!(peer = %peer, error = %e, "Auto-dial failed");
                            }
                        }
                    }
                });
            }
            Some(_) => {}
            None => return,
        }
    }
}
