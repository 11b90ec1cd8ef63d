//! Discovery by announcing ourselves on a local broadcast medium.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use plexus_crypto::PeerId;
use plexus_types::{Multiaddr, LOCAL_BROADCAST_INTERVAL_MS};
use plexus_wire::{PeerAnnouncement, MAX_ANNOUNCEMENT_SIZE};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace, warn};

use super::{DiscoveryContext, DiscoveryStrategy};
use crate::error::{NetworkError, NetworkResult};

/// Datagrams buffered per in-memory endpoint.
const MEMORY_MEDIUM_CAPACITY: usize = 256;

/// Pause after a failed receive before trying again.
const RECV_BACKOFF: Duration = Duration::from_millis(250);

/// A shared medium where every datagram sent reaches every endpoint,
/// including the sender.
#[async_trait]
pub trait BroadcastMedium: Send + Sync + 'static {
    async fn send(&self, datagram: &[u8]) -> NetworkResult<()>;

    async fn recv(&self) -> NetworkResult<Vec<u8>>;
}

/// IPv4 UDP multicast on the local segment.
#[derive(Debug)]
pub struct UdpMulticastMedium {
    socket: UdpSocket,
    group: SocketAddr,
}

impl UdpMulticastMedium {
    /// Join `group` (e.g. `239.255.70.77:45777`).
    ///
    /// The port is bound with `SO_REUSEADDR` so several nodes on one host can
    /// share it. Must be called inside a tokio runtime.
    pub fn bind(group: SocketAddr) -> NetworkResult<Self> {
        let SocketAddr::V4(v4) = group else {
            return Err(NetworkError::UnsupportedAddress(group.to_string()));
        };
        if !v4.ip().is_multicast() {
            return Err(NetworkError::UnsupportedAddress(format!(
                "{} is not a multicast group",
                group
            )));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, v4.port())).into())?;
        socket.join_multicast_v4(v4.ip(), &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!(group = %group, "Joined multicast group");
        Ok(Self { socket, group })
    }
}

#[async_trait]
impl BroadcastMedium for UdpMulticastMedium {
    async fn send(&self, datagram: &[u8]) -> NetworkResult<()> {
        self.socket.send_to(datagram, self.group).await?;
        Ok(())
    }

    async fn recv(&self) -> NetworkResult<Vec<u8>> {
        let mut buf = vec![0u8; MAX_ANNOUNCEMENT_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        trace!(from = %from, len, "Multicast datagram");
        buf.truncate(len);
        Ok(buf)
    }
}

/// An in-process broadcast segment.
///
/// [`attach`](Self::attach) hands out further endpoints on the same
/// segment, one per node.
#[derive(Debug)]
pub struct MemoryMedium {
    tx: broadcast::Sender<Vec<u8>>,
    rx: Mutex<broadcast::Receiver<Vec<u8>>>,
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMedium {
    /// A new segment with one endpoint.
    pub fn new() -> Self {
        let (tx, rx) = broadcast::channel(MEMORY_MEDIUM_CAPACITY);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Another endpoint on the same segment.
    pub fn attach(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        }
    }
}

#[async_trait]
impl BroadcastMedium for MemoryMedium {
    async fn send(&self, datagram: &[u8]) -> NetworkResult<()> {
        // Nobody listening is not an error on a broadcast medium.
        let _ = self.tx.send(datagram.to_vec());
        Ok(())
    }

    async fn recv(&self) -> NetworkResult<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(datagram) => return Ok(datagram),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Memory medium receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(NetworkError::ChannelClosed),
            }
        }
    }
}

/// Announces the node on a [`BroadcastMedium`] and reports peers heard
/// announcing there.
///
/// A peer is reported once per interval unless its addresses change.
pub struct LocalBroadcast {
    medium: Arc<dyn BroadcastMedium>,
    interval: Duration,
}

impl std::fmt::Debug for LocalBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBroadcast")
            .field("interval", &self.interval)
            .finish()
    }
}

impl LocalBroadcast {
    pub fn new(medium: Arc<dyn BroadcastMedium>) -> Self {
        Self {
            medium,
            interval: Duration::from_millis(LOCAL_BROADCAST_INTERVAL_MS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn announce(&self, ctx: &DiscoveryContext) {
        let addrs = ctx.listen_addrs();
        if addrs.is_empty() {
            return;
        }
        let result = async {
            let datagram = PeerAnnouncement::new(ctx.identity(), &addrs).encode()?;
            self.medium.send(&datagram).await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Local broadcast announcement failed");
        }
    }
}

fn should_report(
    recent: &mut HashMap<PeerId, (Instant, Vec<Multiaddr>)>,
    peer: PeerId,
    addresses: &[Multiaddr],
    interval: Duration,
    now: Instant,
) -> bool {
    if let Some((at, known)) = recent.get(&peer) {
        if now.saturating_duration_since(*at) < interval && known.as_slice() == addresses {
            return false;
        }
    }
    recent.insert(peer, (now, addresses.to_vec()));
    true
}

/// Forget announcers not reported within the last `interval`.
fn prune_recent(
    recent: &mut HashMap<PeerId, (Instant, Vec<Multiaddr>)>,
    interval: Duration,
    now: Instant,
) {
    recent.retain(|_, (at, _)| now.saturating_duration_since(*at) < interval);
}

#[async_trait]
impl DiscoveryStrategy for LocalBroadcast {
    fn name(&self) -> &'static str {
        "local-broadcast"
    }

    async fn run(&self, ctx: DiscoveryContext) {
        let mut recent = HashMap::new();
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => {
                    prune_recent(&mut recent, self.interval, Instant::now());
                    self.announce(&ctx).await;
                }
                datagram = self.medium.recv() => {
                    let datagram = match datagram {
                        Ok(datagram) => datagram,
                        Err(e) => {
                            warn!(error = %e, "Local broadcast receive failed");
                            tokio::time::sleep(RECV_BACKOFF).await;
                            continue;
                        }
                    };

                    let verified = PeerAnnouncement::decode(&datagram).and_then(|a| a.verify());
                    let announcement = match verified {
                        Ok(announcement) => announcement,
                        Err(e) => {
                            debug!(error = %e, "Ignoring invalid announcement");
                            continue;
                        }
                    };
                    if announcement.peer == ctx.local_peer() {
                        continue;
                    }
                    if should_report(
                        &mut recent,
                        announcement.peer,
                        &announcement.addresses,
                        self.interval,
                        Instant::now(),
                    ) {
                        ctx.discovered(announcement.peer, announcement.addresses);
                    }
                }
            }
        }
    }
}
