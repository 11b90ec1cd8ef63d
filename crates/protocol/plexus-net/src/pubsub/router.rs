//! Flood-style publish/subscribe.
//!
//! Every connected peer gets one outbound `/floodsub/1.0.0` stream from us
//! and sends to us over its own inbound stream. Messages reach the stream
//! through a bounded per-peer queue and are dropped when it is full.
//! Subscription changes travel on a separate unbounded control queue that
//! the writer drains first, so a peer's view of our topics is never lost. The first RPC on each stream is the sender's full subscription
//! set; later RPCs carry incremental subscription changes and messages.
//!
//! A message is forwarded to every peer subscribed to its topic except the
//! peer it came from and its origin. Duplicates are dropped by the seen
//! cache, so a message reaches each local subscriber at most once per
//! cache window.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use plexus_crypto::{content_hash, message_id, PeerId};
use plexus_types::{ProtocolId, Topic, FLOODSUB_PROTOCOL, MAX_RPC_SIZE};
use plexus_wire::{Rpc, RpcMessage};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::seen::SeenCache;
use super::MessageId;
use crate::codec::{read_length_prefixed, write_length_prefixed};
use crate::config::{MessageIdMode, PubSubConfig};
use crate::connection::{Connection, ConnectionId};
use crate::error::{NetworkError, NetworkResult};
use crate::negotiate::{negotiate_outbound, InboundStream};

/// Messages queued per peer before new ones are dropped.
const PEER_QUEUE: usize = 256;

/// Identifies one local subscription.
pub type SubscriptionId = u64;

/// A message delivered to local subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// The peer that published the message.
    pub from: PeerId,
    pub seqno: u64,
    pub topic: Topic,
    pub data: Vec<u8>,
}

type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

enum Sink {
    Callback(Callback),
    Queue(mpsc::Sender<Message>),
}

#[derive(Default)]
struct LocalTopic {
    sinks: Vec<(SubscriptionId, Sink)>,
}

struct PeerLink {
    connection: ConnectionId,
    topics: HashSet<Topic>,
    outbound: mpsc::Sender<Bytes>,
    control: mpsc::UnboundedSender<Bytes>,
}

#[derive(Default)]
struct RouterState {
    local: HashMap<Topic, LocalTopic>,
    peers: HashMap<PeerId, PeerLink>,
}

struct PubSubInner {
    local_peer: PeerId,
    config: PubSubConfig,
    negotiation_timeout: Duration,
    protocol: ProtocolId,
    seqno: AtomicU64,
    next_subscription: AtomicU64,
    state: Mutex<RouterState>,
    seen: Mutex<SeenCache>,
}

/// The flood pubsub router of one node.
///
/// Cloning yields another handle to the same router.
#[derive(Clone)]
pub struct PubSub {
    inner: Arc<PubSubInner>,
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("local_peer", &self.inner.local_peer)
            .field("topics", &self.topics())
            .finish()
    }
}

impl PubSub {
    pub(crate) fn new(
        local_peer: PeerId,
        config: PubSubConfig,
        negotiation_timeout: Duration,
    ) -> NetworkResult<Self> {
        let protocol = FLOODSUB_PROTOCOL
            .parse()
            .map_err(|e| NetworkError::Encoding(format!("floodsub protocol id: {}", e)))?;
        let seen = SeenCache::new(config.seen_ttl, config.seen_capacity);

        Ok(Self {
            inner: Arc::new(PubSubInner {
                local_peer,
                config,
                negotiation_timeout,
                protocol,
                // Random start so restarted peers do not reuse message ids.
                seqno: AtomicU64::new(rand::random::<u64>() >> 1),
                next_subscription: AtomicU64::new(1),
                state: Mutex::new(RouterState::default()),
                seen: Mutex::new(seen),
            }),
        })
    }

    /// The control protocol spoken between routers.
    pub fn protocol(&self) -> &ProtocolId {
        &self.inner.protocol
    }

    /// Subscribe `callback` to `topic`.
    ///
    /// The callback runs on the task that received the message and must not
    /// block.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner
            .add_sink(topic.into(), Sink::Callback(Arc::new(callback)))
    }

    /// Subscribe to `topic` through a bounded queue.
    ///
    /// Messages arriving while the queue is full are dropped for this
    /// subscriber only. Dropping the [`Subscription`] cancels it.
    pub fn subscribe_stream(&self, topic: impl Into<Topic>) -> Subscription {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_queue.max(1));
        let id = self.inner.add_sink(topic.clone(), Sink::Queue(tx));
        Subscription {
            id,
            topic,
            rx,
            router: Arc::downgrade(&self.inner),
        }
    }

    /// Remove every local subscription to `topic` and withdraw it from
    /// peers. Returns whether there was one.
    pub fn unsubscribe(&self, topic: impl Into<Topic>) -> bool {
        let topic = topic.into();
        let removed = self.inner.state().local.remove(&topic).is_some();
        if removed {
            debug!(topic = %topic, "Unsubscribed");
            self.inner.announce(&topic, false);
        }
        removed
    }

    /// Cancel a single subscription.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        self.inner.remove_sink(id)
    }

    /// Publish `data` on `topic`.
    ///
    /// Succeeds even when no peer is subscribed; the message then goes
    /// nowhere.
    pub fn publish(&self, topic: impl Into<Topic>, data: impl Into<Vec<u8>>) -> NetworkResult<MessageId> {
        let inner = &self.inner;
        let message = RpcMessage {
            from: inner.local_peer,
            seqno: inner.seqno.fetch_add(1, Ordering::Relaxed),
            topic: topic.into(),
            data: data.into(),
        };
        let id = inner.message_id(&message);
        let encoded = Bytes::from(Rpc::message(message.clone()).encode()?);

        inner.seen().insert(id);
        if inner.config.emit_self {
            inner.deliver(id, &message);
        }
        let sent = inner.forward(&message, encoded, None);
        trace!(topic = %message.topic, peers = sent, "Published message");
        Ok(id)
    }

    /// Topics with at least one local subscription.
    pub fn topics(&self) -> Vec<Topic> {
        self.inner.state().local.keys().cloned().collect()
    }

    /// Connected peers known to subscribe to `topic`.
    pub fn peers_subscribed(&self, topic: impl Into<Topic>) -> Vec<PeerId> {
        let topic = topic.into();
        self.inner
            .state()
            .peers
            .iter()
            .filter(|(_, link)| link.topics.contains(&topic))
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// Peers currently speaking pubsub with us.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.state().peers.keys().copied().collect()
    }

    /// Start exchanging pubsub traffic over a new connection.
    pub(crate) fn add_peer(&self, conn: Connection) {
        let peer = conn.peer();
        let (tx, rx) = mpsc::channel(PEER_QUEUE);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        {
            let mut state = self.inner.state();
            // The snapshot goes first so the remote sees changes in order.
            let topics: Vec<Topic> = state.local.keys().cloned().collect();
            if !topics.is_empty() {
                match Rpc::subscriptions(topics, true).encode() {
                    Ok(snapshot) => {
                        let _ = control_tx.send(Bytes::from(snapshot));
                    }
                    Err(e) => warn!(error = %e, "Failed to encode subscription snapshot"),
                }
            }
            state.peers.insert(
                peer,
                PeerLink {
                    connection: conn.id(),
                    topics: HashSet::new(),
                    outbound: tx,
                    control: control_tx,
                },
            );
        }

        debug!(peer = %peer, connection = conn.id(), "Pubsub peer added");
        tokio::spawn(peer_writer(Arc::clone(&self.inner), conn, control_rx, rx));
    }

    /// Read RPCs from a peer's inbound pubsub stream until it ends.
    pub(crate) async fn handle_inbound(&self, inbound: InboundStream) {
        let InboundStream {
            mut stream, peer, ..
        } = inbound;

        loop {
            let bytes = match read_length_prefixed(&mut stream, MAX_RPC_SIZE).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Pubsub stream ended");
                    break;
                }
            };

            match Rpc::decode(&bytes) {
                Ok(rpc) => self.inner.handle_rpc(peer, rpc),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Invalid pubsub RPC");
                    stream.reset();
                    break;
                }
            }
        }
    }
}

impl PubSubInner {
    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn seen(&self) -> MutexGuard<'_, SeenCache> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn message_id(&self, message: &RpcMessage) -> MessageId {
        match self.config.message_id {
            MessageIdMode::SourceAndSeqno => message_id(&message.from, message.seqno),
            MessageIdMode::Payload => content_hash(&message.data),
        }
    }

    fn add_sink(&self, topic: Topic, sink: Sink) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut state = self.state();
            let entry = state.local.entry(topic.clone()).or_default();
            entry.sinks.push((id, sink));
            entry.sinks.len() == 1
        };

        if first {
            debug!(topic = %topic, "Subscribed");
            self.announce(&topic, true);
        }
        id
    }

    fn remove_sink(&self, id: SubscriptionId) -> bool {
        let emptied = {
            let mut state = self.state();
            let found = state.local.iter_mut().find_map(|(topic, local)| {
                let before = local.sinks.len();
                local.sinks.retain(|(sink_id, _)| *sink_id != id);
                (local.sinks.len() != before).then(|| (topic.clone(), local.sinks.is_empty()))
            });
            match found {
                Some((topic, true)) => {
                    state.local.remove(&topic);
                    Some(Some(topic))
                }
                Some((_, false)) => Some(None),
                None => None,
            }
        };

        match emptied {
            Some(Some(topic)) => {
                debug!(topic = %topic, "Last subscription cancelled");
                self.announce(&topic, false);
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Tell every peer about a subscription change.
    fn announce(&self, topic: &Topic, subscribe: bool) {
        let encoded = match Rpc::subscriptions([topic.clone()], subscribe).encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to encode subscription");
                return;
            }
        };

        let state = self.state();
        for (peer, link) in &state.peers {
            if link.control.send(encoded.clone()).is_err() {
                trace!(peer = %peer, topic = %topic, "Pubsub writer gone, subscription change skipped");
            }
        }
    }

    fn handle_rpc(&self, from_peer: PeerId, rpc: Rpc) {
        if !rpc.subscriptions.is_empty() {
            let mut state = self.state();
            if let Some(link) = state.peers.get_mut(&from_peer) {
                for sub in rpc.subscriptions {
                    trace!(peer = %from_peer, topic = %sub.topic, subscribe = sub.subscribe, "Peer subscription");
                    if sub.subscribe {
                        link.topics.insert(sub.topic);
                    } else {
                        link.topics.remove(&sub.topic);
                    }
                }
            } else {
                debug!(peer = %from_peer, "Subscription update from unknown pubsub peer");
            }
        }

        for message in rpc.messages {
            if message.from == self.local_peer {
                continue;
            }
            let id = self.message_id(&message);
            if !self.seen().insert(id) {
                trace!(peer = %from_peer, topic = %message.topic, "Dropping duplicate message");
                continue;
            }

            self.deliver(id, &message);

            match Rpc::message(message.clone()).encode() {
                Ok(encoded) => {
                    let forwarded = self.forward(&message, Bytes::from(encoded), Some(from_peer));
                    if forwarded > 0 {
                        trace!(topic = %message.topic, peers = forwarded, "Forwarded message");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to re-encode message for forwarding"),
            }
        }
    }

    /// Hand a message to local subscribers.
    fn deliver(&self, id: MessageId, message: &RpcMessage) {
        let (callbacks, queues): (Vec<Callback>, Vec<mpsc::Sender<Message>>) = {
            let state = self.state();
            let Some(local) = state.local.get(&message.topic) else {
                return;
            };
            let mut callbacks = Vec::new();
            let mut queues = Vec::new();
            for (_, sink) in &local.sinks {
                match sink {
                    Sink::Callback(cb) => callbacks.push(Arc::clone(cb)),
                    Sink::Queue(tx) => queues.push(tx.clone()),
                }
            }
            (callbacks, queues)
        };

        let delivered = Message {
            id,
            from: message.from,
            seqno: message.seqno,
            topic: message.topic.clone(),
            data: message.data.clone(),
        };

        for callback in callbacks {
            callback(&delivered);
        }
        for queue in queues {
            if let Err(mpsc::error::TrySendError::Full(_)) = queue.try_send(delivered.clone()) {
                warn!(topic = %delivered.topic, "Subscriber queue full, dropping message");
            }
        }
    }

    /// Queue `encoded` for every subscribed peer except the sender and the
    /// origin. Returns how many peers it was queued for.
    fn forward(&self, message: &RpcMessage, encoded: Bytes, received_from: Option<PeerId>) -> usize {
        let state = self.state();
        let mut sent = 0;
        for (peer, link) in &state.peers {
            if Some(*peer) == received_from || *peer == message.from {
                continue;
            }
            if !link.topics.contains(&message.topic) {
                continue;
            }
            match link.outbound.try_send(encoded.clone()) {
                Ok(()) => sent += 1,
                Err(_) => warn!(peer = %peer, topic = %message.topic, "Pubsub queue full, dropping message"),
            }
        }
        sent
    }

    fn remove_peer(&self, peer: &PeerId, connection: ConnectionId) {
        let mut state = self.state();
        if state.peers.get(peer).map(|link| link.connection) == Some(connection) {
            state.peers.remove(peer);
            debug!(peer = %peer, "Pubsub peer removed");
        }
    }
}

/// Drain one peer's queues into our outbound pubsub stream, control first.
async fn peer_writer(
    inner: Arc<PubSubInner>,
    conn: Connection,
    mut control: mpsc::UnboundedReceiver<Bytes>,
    mut queue: mpsc::Receiver<Bytes>,
) {
    let peer = conn.peer();
    let result: NetworkResult<()> = async {
        let stream = conn.open_stream().await?;
        let (mut stream, _) = negotiate_outbound(
            stream,
            std::slice::from_ref(&inner.protocol),
            inner.negotiation_timeout,
        )
        .await?;

        loop {
            let rpc = tokio::select! {
                biased;
                _ = conn.closed() => return Ok(()),
                rpc = control.recv() => rpc,
                rpc = queue.recv() => rpc,
            };
            // Closed queues mean the link was replaced or removed.
            let Some(rpc) = rpc else {
                let _ = stream.close_write().await;
                return Ok(());
            };
            write_length_prefixed(&mut stream, &rpc, MAX_RPC_SIZE).await?;
        }
    }
    .await;

    if let Err(e) = result {
        debug!(peer = %peer, error = %e, "Pubsub writer stopped");
    }
    inner.remove_peer(&peer, conn.id());
}

/// A pull-based subscription to one topic.
///
/// Also usable as a [`futures::Stream`] of messages.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    rx: mpsc::Receiver<Message>,
    router: Weak<PubSubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next message. Returns `None` once the subscription is
    /// cancelled.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl futures::Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.remove_sink(self.id);
        }
    }
}

impl std::fmt::Debug for PubSubInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubInner")
            .field("local_peer", &self.local_peer)
            .finish()
    }
}
