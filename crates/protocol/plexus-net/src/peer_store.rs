//! Known addresses of remote peers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use plexus_crypto::PeerId;
use plexus_types::Multiaddr;
use tracing::trace;

/// Per-node mapping of peers to the addresses they can be dialed on.
///
/// Addresses are only ever merged in: writing a peer's addresses unions them
/// with what is already known, in first-seen order. Entries do not expire.
/// Cloning yields another handle to the same book.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: Arc<RwLock<HashMap<PeerId, Vec<Multiaddr>>>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `addresses` into the peer's entry.
    ///
    /// Returns the addresses that were not known before.
    pub fn add<I>(&self, peer: PeerId, addresses: I) -> Vec<Multiaddr>
    where
        I: IntoIterator<Item = Multiaddr>,
    {
        let mut entries = self.write();
        let known = entries.entry(peer).or_default();
        let mut added = Vec::new();
        for addr in addresses {
            if !known.contains(&addr) {
                known.push(addr.clone());
                added.push(addr);
            }
        }
        if !added.is_empty() {
            trace!(peer = %peer, added = added.len(), "Address book updated");
        }
        added
    }

    /// Record addresses for a peer.
    ///
    /// Same as [`add`](Self::add): addresses already on file are kept.
    pub fn set<I>(&self, peer: PeerId, addresses: I)
    where
        I: IntoIterator<Item = Multiaddr>,
    {
        self.add(peer, addresses);
    }

    /// Known addresses of `peer`, empty when unknown.
    pub fn get(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.read().get(peer).cloned().unwrap_or_default()
    }

    /// Forget everything about `peer`.
    pub fn remove(&self, peer: &PeerId) -> Option<Vec<Multiaddr>> {
        self.write().remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.read().contains_key(peer)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PeerId, Vec<Multiaddr>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PeerId, Vec<Multiaddr>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
