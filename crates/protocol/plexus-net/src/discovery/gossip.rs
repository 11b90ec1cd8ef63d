use std::time::Duration;

use async_trait::async_trait;
use plexus_types::{Topic, GOSSIP_DISCOVERY_INTERVAL_MS, GOSSIP_DISCOVERY_TOPIC};
use plexus_wire::PeerAnnouncement;
use tracing::{debug, trace, warn};

use super::{DiscoveryContext, DiscoveryStrategy};
use crate::error::NetworkError;
use crate::pubsub::Message;

/// Announces the node on a pubsub topic and reports peers announcing there.
///
/// Only works through peers we are already connected to; it spreads
/// knowledge of the rest of the mesh.
#[derive(Debug, Clone)]
pub struct GossipDiscovery {
    topic: Topic,
    interval: Duration,
}

impl Default for GossipDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipDiscovery {
    pub fn new() -> Self {
        Self {
            topic: Topic::from(GOSSIP_DISCOVERY_TOPIC),
            interval: Duration::from_millis(GOSSIP_DISCOVERY_INTERVAL_MS),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<Topic>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn announce(&self, ctx: &DiscoveryContext) {
        let addrs = ctx.listen_addrs();
        if addrs.is_empty() {
            return;
        }
        let published = PeerAnnouncement::new(ctx.identity(), &addrs)
            .encode()
            .map_err(NetworkError::from)
            .and_then(|payload| ctx.pubsub().publish(self.topic.clone(), payload));
        if let Err(e) = published {
            warn!(topic = %self.topic, error = %e, "Gossip announcement failed");
        }
    }

    fn handle(&self, ctx: &DiscoveryContext, message: Message) {
        let verified = PeerAnnouncement::decode(&message.data).and_then(|a| a.verify());
        let announcement = match verified {
            Ok(announcement) => announcement,
            Err(e) => {
                debug!(from = %message.from, error = %e, "Ignoring invalid announcement");
                return;
            }
        };

        // Only the announcer itself may publish its announcement.
        if announcement.peer != message.from {
            trace!(from = %message.from, peer = %announcement.peer, "Ignoring relayed announcement");
            return;
        }
        ctx.discovered(announcement.peer, announcement.addresses);
    }
}

#[async_trait]
impl DiscoveryStrategy for GossipDiscovery {
    fn name(&self) -> &'static str {
        "gossip"
    }

    async fn run(&self, ctx: DiscoveryContext) {
        let mut subscription = ctx.pubsub().subscribe_stream(self.topic.clone());
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => self.announce(&ctx),
                message = subscription.recv() => match message {
                    Some(message) => self.handle(&ctx, message),
                    None => return,
                },
            }
        }
    }
}
