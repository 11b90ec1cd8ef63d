//! Connection management.
//!
//! The [`ConnectionManager`] owns every live connection of a node. It keeps
//! at most one connection per peer, drives dials through
//! transport, security upgrade and multiplexing, and reports connectivity
//! changes as [`NetworkEvent`]s.
//!
//! Per peer the manager moves through:
//!
//! ```text
//! Disconnected -> Dialing -> SecuringConnection -> Connected -> Closing -> Disconnected
//! ```
//!
//! A second connection to a connected peer is reconciled by the side with
//! the lower `PeerId` alone: it keeps the established connection and closes
//! the new one. The higher side never closes a duplicate. It holds the extra
//! connection on standby and promotes it, without any event, if the remote
//! closes the one in use. Both sides converge on one connection without
//! exchanging anything, and an established connection is never torn down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use plexus_crypto::{Keypair, PeerId};
use plexus_types::{Direction, Multiaddr};
use tracing::{debug, info, trace, warn};

use crate::config::{MuxConfig, NetworkConfig};
use crate::error::{NetworkError, NetworkResult};
use crate::event::{EventSender, NetworkEvent};
use crate::muxer::{Muxer, Stream};
use crate::peer_store::AddressBook;
use crate::secure::SecurityUpgrade;
use crate::transport::{BoxedIo, Transport};

/// Identifies one connection within a node.
pub type ConnectionId = u64;

/// Connectivity of one remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Disconnected,
    /// Opening a transport connection.
    Dialing,
    /// Running the security handshake.
    SecuringConnection,
    Connected,
    /// Tearing down the connection.
    Closing,
}

/// An established, secured and multiplexed connection to one peer.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    peer: PeerId,
    dialer: PeerId,
    direction: Direction,
    remote_addr: Multiaddr,
    opened_at: Instant,
    muxer: Muxer,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> PeerId {
        self.inner.peer
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// The peer that dialed this connection.
    pub fn dialer(&self) -> PeerId {
        self.inner.dialer
    }

    pub fn remote_addr(&self) -> &Multiaddr {
        &self.inner.remote_addr
    }

    pub fn opened_at(&self) -> Instant {
        self.inner.opened_at
    }

    pub fn muxer(&self) -> &Muxer {
        &self.inner.muxer
    }

    pub async fn open_stream(&self) -> NetworkResult<Stream> {
        self.inner.muxer.open_stream().await
    }

    pub async fn accept_stream(&self) -> NetworkResult<Stream> {
        self.inner.muxer.accept_stream().await
    }

    /// Close the connection, resetting all of its streams.
    pub fn close(&self) {
        self.inner.muxer.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.muxer.is_closed()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        self.inner.muxer.closed().await
    }
}

/// Called with every connection the manager keeps.
pub(crate) type ConnectionHook = Arc<dyn Fn(Connection) + Send + Sync>;

type DialFuture = Shared<BoxFuture<'static, NetworkResult<Connection>>>;

#[derive(Debug, Clone, Copy)]
struct Settings {
    dial_timeout: Duration,
    handshake_timeout: Duration,
    max_connections: usize,
    mux: MuxConfig,
}

#[derive(Default)]
struct ManagerState {
    connections: HashMap<PeerId, Connection>,
    dials: HashMap<PeerId, (u64, WeakShared<BoxFuture<'static, NetworkResult<Connection>>>)>,
    phases: HashMap<PeerId, PeerState>,
    /// Duplicates held until the remote settles on one connection.
    standby: HashMap<PeerId, Vec<Connection>>,
}

struct ManagerInner {
    identity: Keypair,
    local_peer: PeerId,
    transport: Arc<dyn Transport>,
    security: Arc<dyn SecurityUpgrade>,
    address_book: AddressBook,
    events: EventSender,
    settings: Settings,
    next_connection: AtomicU64,
    next_attempt: AtomicU64,
    state: Mutex<ManagerState>,
    hook: RwLock<Option<ConnectionHook>>,
}

/// Owns the live connections of one node.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("local_peer", &self.inner.local_peer)
            .field("connections", &self.inner.state().connections.len())
            .finish()
    }
}

impl ConnectionManager {
    pub(crate) fn new(
        identity: Keypair,
        transport: Arc<dyn Transport>,
        security: Arc<dyn SecurityUpgrade>,
        address_book: AddressBook,
        events: EventSender,
        config: &NetworkConfig,
    ) -> Self {
        let local_peer = identity.peer_id();
        Self {
            inner: Arc::new(ManagerInner {
                identity,
                local_peer,
                transport,
                security,
                address_book,
                events,
                settings: Settings {
                    dial_timeout: config.dial_timeout,
                    handshake_timeout: config.handshake_timeout,
                    max_connections: config.max_connections,
                    mux: config.mux,
                },
                next_connection: AtomicU64::new(1),
                next_attempt: AtomicU64::new(1),
                state: Mutex::new(ManagerState::default()),
                hook: RwLock::new(None),
            }),
        }
    }

    /// Install the callback that receives every kept connection.
    pub(crate) fn set_connection_hook(&self, hook: ConnectionHook) {
        *self.inner.hook.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn local_peer(&self) -> PeerId {
        self.inner.local_peer
    }

    /// Connect to `peer` using its addresses from the address book.
    ///
    /// Returns the existing connection when already connected. Concurrent
    /// calls for one peer share a single attempt. Dropping every caller's
    /// future cancels the attempt and returns the peer to `Disconnected`.
    pub async fn dial(&self, peer: PeerId) -> NetworkResult<Connection> {
        if peer == self.inner.local_peer {
            return Err(NetworkError::Unreachable("cannot dial the local peer".into()));
        }
        if let Some(conn) = self.connection(&peer) {
            return Ok(conn);
        }

        let attempt = {
            let mut state = self.inner.state();
            let existing = state
                .dials
                .get(&peer)
                .and_then(|(_, weak)| weak.upgrade());
            match existing {
                Some(attempt) => attempt,
                None => {
                    let id = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let attempt: DialFuture = dial_attempt(Arc::clone(&self.inner), peer, id)
                        .boxed()
                        .shared();
                    if let Some(weak) = attempt.downgrade() {
                        state.dials.insert(peer, (id, weak));
                    }
                    state.phases.insert(peer, PeerState::Dialing);
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Connect to whoever listens on `addr`.
    pub async fn dial_addr(&self, addr: &Multiaddr) -> NetworkResult<Connection> {
        let inner = &self.inner;
        let connect = async {
            let io = inner.transport.connect(addr).await?;
            inner.upgrade(io, addr.clone(), Direction::Outbound, None).await
        };

        let conn = tokio::time::timeout(inner.settings.dial_timeout, connect)
            .await
            .map_err(|_| NetworkError::Timeout(format!("dialing {}", addr)))??;

        inner.address_book.add(conn.peer(), [addr.clone()]);
        Ok(inner.register(conn))
    }

    /// Secure and register an inbound transport connection.
    pub async fn accept(&self, io: BoxedIo, remote_addr: Multiaddr) -> NetworkResult<Connection> {
        let inner = &self.inner;
        let count = inner.state().connections.len();
        if count >= inner.settings.max_connections {
            warn!(
                remote = %remote_addr,
                max = inner.settings.max_connections,
                "Connection limit reached, dropping inbound connection"
            );
            return Err(NetworkError::ConnectionLimit {
                max: inner.settings.max_connections,
            });
        }

        let conn = inner
            .upgrade(io, remote_addr, Direction::Inbound, None)
            .await?;
        Ok(inner.register(conn))
    }

    /// Close the connection to `peer`.
    pub async fn disconnect(&self, peer: &PeerId) -> bool {
        let (conn, standby) = {
            let mut state = self.inner.state();
            let conn = state.connections.remove(peer);
            let standby = state.standby.remove(peer).unwrap_or_default();
            if conn.is_some() {
                state.phases.insert(*peer, PeerState::Closing);
            }
            (conn, standby)
        };
        for spare in standby {
            spare.close();
        }
        let Some(conn) = conn else {
            return false;
        };

        info!(peer = %peer, "Disconnecting");
        conn.close();
        conn.closed().await;

        {
            let mut state = self.inner.state();
            if state.phases.get(peer) == Some(&PeerState::Closing) {
                state.phases.remove(peer);
            }
        }
        self.inner
            .events
            .emit(NetworkEvent::PeerDisconnected { peer: *peer });
        true
    }

    pub fn connection(&self, peer: &PeerId) -> Option<Connection> {
        self.inner
            .state()
            .connections
            .get(peer)
            .filter(|conn| !conn.is_closed())
            .cloned()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connection(peer).is_some()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner
            .state()
            .connections
            .iter()
            .filter(|(_, conn)| !conn.is_closed())
            .map(|(peer, _)| *peer)
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state().connections.len()
    }

    pub fn peer_state(&self, peer: &PeerId) -> PeerState {
        let state = self.inner.state();
        match state.phases.get(peer) {
            Some(PeerState::Closing) => PeerState::Closing,
            _ if state.connections.contains_key(peer) => PeerState::Connected,
            Some(phase) => *phase,
            None => PeerState::Disconnected,
        }
    }

    /// Close every connection.
    pub async fn close_all(&self) {
        let peers: Vec<PeerId> = self.inner.state().connections.keys().copied().collect();
        for peer in peers {
            self.disconnect(&peer).await;
        }
    }
}

impl ManagerInner {
    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, peer: PeerId, attempt: u64, phase: PeerState) {
        let mut state = self.state();
        if matches!(state.dials.get(&peer), Some((id, _)) if *id == attempt) {
            state.phases.insert(peer, phase);
        }
    }

    /// Clear a finished or abandoned dial attempt.
    fn finish_dial(&self, peer: PeerId, attempt: u64) {
        let mut state = self.state();
        let current = match state.dials.get(&peer) {
            Some((id, _)) => *id == attempt,
            None => true,
        };
        if current {
            state.dials.remove(&peer);
            if matches!(
                state.phases.get(&peer),
                Some(PeerState::Dialing | PeerState::SecuringConnection)
            ) {
                state.phases.remove(&peer);
            }
        }
    }

    async fn upgrade(
        &self,
        io: BoxedIo,
        remote_addr: Multiaddr,
        direction: Direction,
        expected: Option<PeerId>,
    ) -> NetworkResult<Connection> {
        let session = tokio::time::timeout(
            self.settings.handshake_timeout,
            self.security.secure(io, &self.identity, expected),
        )
        .await
        .map_err(|_| NetworkError::Timeout("security handshake".into()))??;

        let peer = session.remote_peer();
        if peer == self.local_peer {
            return Err(NetworkError::Unreachable("connected to the local peer".into()));
        }

        let dialer = if direction.is_outbound() {
            self.local_peer
        } else {
            peer
        };
        let muxer = Muxer::new(session, direction, self.settings.mux);
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        trace!(peer = %peer, connection = id, ?direction, "Connection secured");

        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                id,
                peer,
                dialer,
                direction,
                remote_addr,
                opened_at: Instant::now(),
                muxer,
            }),
        })
    }

    /// Add a freshly established connection, reconciling duplicates.
    ///
    /// Returns the connection that stays in use for the peer.
    fn register(self: &Arc<Self>, conn: Connection) -> Connection {
        let peer = conn.peer();
        let decides = self.local_peer < peer;
        enum Outcome {
            Added { stale: bool },
            Duplicate(Connection),
        }

        let outcome = {
            let mut state = self.state();
            let existing = state
                .connections
                .get(&peer)
                .filter(|existing| !existing.is_closed())
                .cloned();
            match existing {
                Some(existing) => {
                    if !decides {
                        state.standby.entry(peer).or_default().push(conn.clone());
                    }
                    Outcome::Duplicate(existing)
                }
                None => {
                    let stale = state.connections.insert(peer, conn.clone()).is_some();
                    Outcome::Added { stale }
                }
            }
        };

        match outcome {
            Outcome::Duplicate(existing) => {
                if decides {
                    debug!(
                        peer = %peer,
                        kept = existing.id(),
                        closed = conn.id(),
                        "Duplicate connection, closing the new one"
                    );
                    conn.close();
                } else {
                    debug!(
                        peer = %peer,
                        kept = existing.id(),
                        standby = conn.id(),
                        "Duplicate connection, holding it on standby"
                    );
                    self.watch(&conn);
                }
                existing
            }
            Outcome::Added { stale } => {
                if stale {
                    self.events.emit(NetworkEvent::PeerDisconnected { peer });
                }
                info!(peer = %peer, direction = ?conn.direction(), "Peer connected");
                self.events.emit(NetworkEvent::PeerConnected { peer });
                self.run_hook(&conn);
                self.watch(&conn);
                conn
            }
        }
    }

    /// Hand a connection that is now in use to the connection hook.
    fn run_hook(&self, conn: &Connection) {
        let hook = self.hook.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(hook) = hook {
            hook(conn.clone());
        }
    }

    /// Watch `conn` for closure.
    fn watch(self: &Arc<Self>, conn: &Connection) {
        let manager = Arc::downgrade(self);
        let watched = conn.clone();
        tokio::spawn(async move {
            watched.closed().await;
            if let Some(manager) = Weak::upgrade(&manager) {
                manager.connection_closed(&watched);
            }
        });
    }

    fn connection_closed(&self, conn: &Connection) {
        let peer = conn.peer();
        let mut promoted = None;
        let mut removed = false;
        {
            let mut state = self.state();
            let mut standby = state.standby.remove(&peer).unwrap_or_default();
            standby.retain(|spare| spare.id() != conn.id() && !spare.is_closed());

            if state.connections.get(&peer).map(Connection::id) == Some(conn.id()) {
                match standby.pop() {
                    Some(next) => {
                        state.connections.insert(peer, next.clone());
                        promoted = Some(next);
                    }
                    None => {
                        state.connections.remove(&peer);
                        removed = true;
                    }
                }
            }
            if !standby.is_empty() {
                state.standby.insert(peer, standby);
            }
        }

        if let Some(next) = promoted {
            debug!(
                peer = %peer,
                closed = conn.id(),
                kept = next.id(),
                "Remote closed the connection in use, promoting standby"
            );
            self.run_hook(&next);
        } else if removed {
            info!(peer = %peer, "Peer disconnected");
            self.events.emit(NetworkEvent::PeerDisconnected { peer });
        }
    }
}

/// Clears the dial bookkeeping when an attempt ends or is dropped.
struct DialGuard {
    inner: Arc<ManagerInner>,
    peer: PeerId,
    attempt: u64,
}

impl Drop for DialGuard {
    fn drop(&mut self) {
        self.inner.finish_dial(self.peer, self.attempt);
    }
}

/// One dial attempt.
///
/// The guard is created before the returned future is first polled, so an
/// attempt dropped at any point still clears its bookkeeping.
fn dial_attempt(
    inner: Arc<ManagerInner>,
    peer: PeerId,
    attempt: u64,
) -> impl std::future::Future<Output = NetworkResult<Connection>> + Send + 'static {
    let guard = DialGuard {
        inner: Arc::clone(&inner),
        peer,
        attempt,
    };
    async move {
        let _guard = guard;
        run_dial(&inner, peer, attempt).await
    }
}

async fn run_dial(inner: &Arc<ManagerInner>, peer: PeerId, attempt: u64) -> NetworkResult<Connection> {
    let result = match tokio::time::timeout(
        inner.settings.dial_timeout,
        dial_addresses(inner, peer, attempt),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout(format!("dialing {}", peer))),
    };

    match result {
        Ok(conn) => Ok(inner.register(conn)),
        Err(error) => {
            warn!(peer = %peer, error = %error, "Dial failed");
            inner.events.emit(NetworkEvent::DialFailed {
                peer,
                error: error.clone(),
            });
            Err(error)
        }
    }
}

/// Try the peer's known addresses in order; the first success wins.
async fn dial_addresses(
    inner: &Arc<ManagerInner>,
    peer: PeerId,
    attempt: u64,
) -> NetworkResult<Connection> {
    let addresses = inner.address_book.get(&peer);
    let mut last_error = NetworkError::NoAddresses(peer);

    for addr in addresses {
        if !inner.transport.supports(&addr) {
            trace!(peer = %peer, address = %addr, "Skipping unsupported address");
            last_error = NetworkError::UnsupportedAddress(addr.to_string());
            continue;
        }

        debug!(peer = %peer, address = %addr, "Dialing");
        inner.set_phase(peer, attempt, PeerState::Dialing);
        let io = match inner.transport.connect(&addr).await {
            Ok(io) => io,
            Err(e) => {
                debug!(peer = %peer, address = %addr, error = %e, "Address unreachable");
                last_error = e;
                continue;
            }
        };

        inner.set_phase(peer, attempt, PeerState::SecuringConnection);
        match inner
            .upgrade(io, addr.clone(), Direction::Outbound, Some(peer))
            .await
        {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                debug!(peer = %peer, address = %addr, error = %e, "Handshake failed");
                last_error = e;
            }
        }
    }

    Err(last_error)
}
