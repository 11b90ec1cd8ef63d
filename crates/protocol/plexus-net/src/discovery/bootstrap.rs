use std::time::Duration;

use async_trait::async_trait;
use plexus_crypto::PeerId;
use plexus_types::{Multiaddr, BOOTSTRAP_INTERVAL_MS};
use tracing::trace;

use super::{DiscoveryContext, DiscoveryStrategy};

/// Reports a fixed list of peers.
///
/// On start and then every interval, each listed peer that is not connected
/// is reported again. Dialing is left to the node's auto-dial.
#[derive(Debug, Clone)]
pub struct StaticBootstrap {
    peers: Vec<(PeerId, Multiaddr)>,
    interval: Duration,
}

impl StaticBootstrap {
    pub fn new(peers: Vec<(PeerId, Multiaddr)>) -> Self {
        Self {
            peers,
            interval: Duration::from_millis(BOOTSTRAP_INTERVAL_MS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn announce(&self, ctx: &DiscoveryContext) {
        for (peer, addr) in &self.peers {
            if ctx.is_connected(peer) {
                trace!(peer = %peer, "Bootstrap peer already connected");
                continue;
            }
            ctx.discovered(*peer, vec![addr.clone()]);
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for StaticBootstrap {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    async fn run(&self, ctx: DiscoveryContext) {
        loop {
            self.announce(&ctx);
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
