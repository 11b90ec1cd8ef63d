//! Network events.
//!
//! This module defines the events emitted by a node and the receiver
//! handed to observers.

use plexus_crypto::PeerId;
use plexus_types::Multiaddr;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::NetworkError;

/// Events emitted by the network layer.
///
/// Each node owns its own queue; see [`crate::Node::subscribe_events`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum NetworkEvent {
    /// A discovery strategy learned addresses for a peer.
    ///
    /// The addresses are already in the address book.
    PeerDiscovered {
        peer: PeerId,
        addresses: Vec<Multiaddr>,
    },

    /// A new peer connected.
    PeerConnected {
        /// The remote peer.
        peer: PeerId,
    },

    /// A peer disconnected.
    PeerDisconnected {
        /// The remote peer.
        peer: PeerId,
    },

    /// A dial attempt failed.
    DialFailed { peer: PeerId, error: NetworkError },

    /// Started listening on a new address.
    NewListenAddr {
        /// The new listen address.
        address: Multiaddr,
    },

    /// A listener stopped.
    ListenerClosed { address: Multiaddr },
}

impl NetworkEvent {
    /// Returns the peer ID if this event is associated with a specific peer.
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            NetworkEvent::PeerDiscovered { peer, .. } => Some(peer),
            NetworkEvent::PeerConnected { peer } => Some(peer),
            NetworkEvent::PeerDisconnected { peer } => Some(peer),
            NetworkEvent::DialFailed { peer, .. } => Some(peer),
            _ => None,
        }
    }
}

/// Sending half of a node's event queue.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: broadcast::Sender<NetworkEvent>,
}

impl EventSender {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event. Having no receivers is fine.
    pub(crate) fn emit(&self, event: NetworkEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of a node's event queue.
///
/// A receiver that falls behind skips the events it missed.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<NetworkEvent>,
}

impl EventReceiver {
    /// Wait for the next event. Returns `None` once the node is dropped.
    pub async fn recv(&mut self) -> Option<NetworkEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged, skipping missed events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<NetworkEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged, skipping missed events");
                }
                Err(_) => return None,
            }
        }
    }
}
