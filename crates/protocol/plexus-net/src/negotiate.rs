//! Per-stream protocol negotiation.
//!
//! Multistream-style exchange on a freshly opened stream:
//!
//! ```text
//! dialer                      acceptor
//!   /multistream/1.0.0  ->  <-  /multistream/1.0.0
//!   /chat/2.0.0         ->
//!                       <-  na
//!   /chat/1.0.0         ->
//!                       <-  /chat/1.0.0
//! ```
//!
//! The acceptor also answers `ls` with every protocol it supports. Either
//! side that fails to finish within the negotiation timeout resets the
//! stream; the connection is unaffected.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use plexus_crypto::PeerId;
use plexus_types::{ProtocolId, MULTISTREAM_PROTOCOL, NEGOTIATION_LS, NEGOTIATION_NA};
use tracing::{debug, trace};

use crate::codec::{read_lines, write_lines};
use crate::error::{NetworkError, NetworkResult};
use crate::muxer::Stream;

/// An inbound stream handed to a protocol handler.
#[derive(Debug)]
pub struct InboundStream {
    /// The negotiated stream.
    pub stream: Stream,
    /// The single protocol id both sides agreed on.
    pub protocol: ProtocolId,
    /// The remote peer.
    pub peer: PeerId,
}

pub(crate) type BoxedHandler = Arc<dyn Fn(InboundStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Maps protocol ids to the handlers serving them.
///
/// Several ids may share one handler; the handler learns which one was
/// agreed through [`InboundStream::protocol`].
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<BTreeMap<ProtocolId, BoxedHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every id in `protocols`, replacing any
    /// handler previously registered for those ids.
    pub fn register<I, F, Fut>(&self, protocols: I, handler: F)
    where
        I: IntoIterator<Item = ProtocolId>,
        F: Fn(InboundStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: BoxedHandler = Arc::new(move |inbound| handler(inbound).boxed());
        let mut handlers = self.write();
        for protocol in protocols {
            debug!(protocol = %protocol, "Registered protocol handler");
            handlers.insert(protocol, Arc::clone(&handler));
        }
    }

    /// Remove the handler for `protocol`. Returns whether one existed.
    pub fn unregister(&self, protocol: &ProtocolId) -> bool {
        self.write().remove(protocol).is_some()
    }

    /// Supported protocol ids, sorted.
    pub fn protocols(&self) -> Vec<ProtocolId> {
        self.read().keys().cloned().collect()
    }

    pub fn is_registered(&self, protocol: &ProtocolId) -> bool {
        self.read().contains_key(protocol)
    }

    fn handler(&self, protocol: &ProtocolId) -> Option<BoxedHandler> {
        self.read().get(protocol).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ProtocolId, BoxedHandler>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ProtocolId, BoxedHandler>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Negotiate an inbound stream and run the matching handler to
    /// completion.
    pub(crate) async fn serve(&self, stream: Stream, timeout: Duration) -> NetworkResult<()> {
        let (inbound, handler) = self.accept(stream, timeout).await?;
        handler(inbound).await;
        Ok(())
    }

    /// Acceptor side of the negotiation.
    pub(crate) async fn accept(
        &self,
        mut stream: Stream,
        timeout: Duration,
    ) -> NetworkResult<(InboundStream, BoxedHandler)> {
        let result = within(timeout, self.select(&mut stream)).await;
        let (protocol, handler) = reset_on_error(&mut stream, result)?;

        trace!(stream = stream.id(), protocol = %protocol, "Inbound protocol agreed");
        stream.set_protocol(protocol.clone());
        let peer = stream.remote_peer();
        Ok((
            InboundStream {
                stream,
                protocol,
                peer,
            },
            handler,
        ))
    }

    async fn select(&self, stream: &mut Stream) -> NetworkResult<(ProtocolId, BoxedHandler)> {
        exchange_header(stream).await?;
        loop {
            let lines = read_lines(stream).await?;
            let [line] = lines.as_slice() else {
                return Err(NetworkError::Decoding(format!(
                    "expected one protocol line, got {}",
                    lines.len()
                )));
            };

            if line == NEGOTIATION_LS {
                let supported: Vec<String> =
                    self.protocols().iter().map(ToString::to_string).collect();
                write_lines(stream, &supported).await?;
                continue;
            }

            let found = line
                .parse::<ProtocolId>()
                .ok()
                .and_then(|protocol| self.handler(&protocol).map(|h| (protocol, h)));
            match found {
                Some((protocol, handler)) => {
                    write_lines(stream, &[line]).await?;
                    return Ok((protocol, handler));
                }
                None => {
                    trace!(proposed = %line, "Declining unsupported protocol");
                    write_lines(stream, &[NEGOTIATION_NA]).await?;
                }
            }
        }
    }
}

/// Propose `candidates` in preference order on a fresh outbound stream.
///
/// Returns the stream with its protocol set, together with the agreed id.
pub async fn negotiate_outbound(
    mut stream: Stream,
    candidates: &[ProtocolId],
    timeout: Duration,
) -> NetworkResult<(Stream, ProtocolId)> {
    let result = within(timeout, propose(&mut stream, candidates)).await;
    match reset_on_error(&mut stream, result)? {
        Some(protocol) => {
            stream.set_protocol(protocol.clone());
            Ok((stream, protocol))
        }
        None => {
            let proposed: Vec<String> = candidates.iter().map(ToString::to_string).collect();
            debug!(peer = %stream.remote_peer(), ?proposed, "No matching protocol");
            stream.reset();
            Err(NetworkError::NoMatchingProtocol { proposed })
        }
    }
}

async fn propose(stream: &mut Stream, candidates: &[ProtocolId]) -> NetworkResult<Option<ProtocolId>> {
    if candidates.is_empty() {
        return Ok(None);
    }

    exchange_header(stream).await?;
    for candidate in candidates {
        let proposal = candidate.to_string();
        write_lines(stream, &[&proposal]).await?;
        let reply = read_lines(stream).await?;
        match reply.as_slice() {
            [line] if *line == proposal => return Ok(Some(candidate.clone())),
            [line] if line == NEGOTIATION_NA => {
                trace!(protocol = %candidate, "Remote declined protocol");
            }
            other => {
                return Err(NetworkError::Decoding(format!(
                    "unexpected negotiation reply {:?}",
                    other
                )))
            }
        }
    }
    Ok(None)
}

/// Ask the remote which protocols it supports.
pub async fn list_protocols(stream: &mut Stream, timeout: Duration) -> NetworkResult<Vec<String>> {
    let result = within(timeout, async {
        exchange_header(stream).await?;
        write_lines(stream, &[NEGOTIATION_LS]).await?;
        read_lines(stream).await
    })
    .await;
    reset_on_error(stream, result)
}

async fn exchange_header(stream: &mut Stream) -> NetworkResult<()> {
    write_lines(stream, &[MULTISTREAM_PROTOCOL]).await?;
    let header = read_lines(stream).await?;
    if header.len() != 1 || header[0] != MULTISTREAM_PROTOCOL {
        return Err(NetworkError::Decoding(format!(
            "expected {} header, got {:?}",
            MULTISTREAM_PROTOCOL, header
        )));
    }
    Ok(())
}

async fn within<T>(
    timeout: Duration,
    negotiation: impl Future<Output = NetworkResult<T>>,
) -> NetworkResult<T> {
    tokio::time::timeout(timeout, negotiation)
        .await
        .unwrap_or(Err(NetworkError::NegotiationTimeout))
}

fn reset_on_error<T>(stream: &mut Stream, result: NetworkResult<T>) -> NetworkResult<T> {
    if let Err(e) = &result {
        debug!(stream = stream.id(), error = %e, "Protocol negotiation failed");
        stream.reset();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muxer::StreamState;
    use crate::test_support::stream_pair;

    fn id(s: &str) -> ProtocolId {
        s.parse().unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_handler_sees_agreed_version() {
        let (_d, _l, outbound, inbound) = stream_pair().await;
        let registry = HandlerRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        registry.register(
            [id("/your-protocol/1.0.0"), id("/your-protocol/2.0.0")],
            move |inbound: InboundStream| {
                let tx = tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(inbound.protocol.clone());
                    }
                }
            },
        );

        let serve = tokio::spawn({
            let registry = registry.clone();
            async move { registry.serve(inbound, TIMEOUT).await }
        });

        let (stream, agreed) = negotiate_outbound(outbound, &[id("/your-protocol/2.0.0")], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(agreed, id("/your-protocol/2.0.0"));
        assert_eq!(stream.protocol(), Some(&agreed));

        serve.await.unwrap().unwrap();
        assert_eq!(rx.await.unwrap(), id("/your-protocol/2.0.0"));
    }

    #[tokio::test]
    async fn test_falls_back_in_preference_order() {
        let (_d, _l, outbound, inbound) = stream_pair().await;
        let registry = HandlerRegistry::new();
        registry.register([id("/chat/1.0.0")], |_| async {});

        let accept = tokio::spawn({
            let registry = registry.clone();
            async move { registry.accept(inbound, TIMEOUT).await.map(|(s, _)| s.protocol) }
        });

        let (_stream, agreed) =
            negotiate_outbound(outbound, &[id("/chat/2.0.0"), id("/chat/1.0.0")], TIMEOUT)
                .await
                .unwrap();
        assert_eq!(agreed, id("/chat/1.0.0"));
        assert_eq!(accept.await.unwrap().unwrap(), id("/chat/1.0.0"));
    }

    #[tokio::test]
    async fn test_no_matching_protocol_resets_stream() {
        let (dialer, _l, outbound, inbound) = stream_pair().await;
        let registry = HandlerRegistry::new();
        registry.register([id("/a/1.0.0")], |_| async {});

        let accept = tokio::spawn({
            let registry = registry.clone();
            async move { registry.accept(inbound, TIMEOUT).await.map(|_| ()) }
        });

        let result = negotiate_outbound(outbound, &[id("/b/1.0.0"), id("/c")], TIMEOUT).await;
        match result {
            Err(NetworkError::NoMatchingProtocol { proposed }) => {
                assert_eq!(proposed, vec!["/b/1.0.0".to_string(), "/c".to_string()]);
            }
            other => panic!("expected NoMatchingProtocol, got {:?}", other.map(|(_, p)| p)),
        }

        // The acceptor sees the reset, the session survives.
        assert!(accept.await.unwrap().is_err());
        assert!(!dialer.is_closed());
        assert!(dialer.open_stream().await.is_ok());
    }

    #[tokio::test]
    async fn test_silent_acceptor_times_out() {
        let (dialer, _l, outbound, mut inbound) = stream_pair().await;

        let result = negotiate_outbound(outbound, &[id("/slow")], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(NetworkError::NegotiationTimeout)));

        // The reset reaches the acceptor.
        let read = tokio::time::timeout(TIMEOUT, async {
            loop {
                match inbound.read().await {
                    Ok(Some(_)) => continue,
                    other => return other,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(read, Err(NetworkError::StreamReset)));
        assert_eq!(inbound.state(), StreamState::Reset);
        assert!(!dialer.is_closed());
    }

    #[tokio::test]
    async fn test_list_protocols() {
        let (_d, _l, mut outbound, inbound) = stream_pair().await;
        let registry = HandlerRegistry::new();
        registry.register([id("/b/1.0.0"), id("/a")], |_| async {});

        let _accept = tokio::spawn({
            let registry = registry.clone();
            async move { registry.accept(inbound, TIMEOUT).await.map(|_| ()) }
        });

        let listed = list_protocols(&mut outbound, TIMEOUT).await.unwrap();
        assert_eq!(listed, vec!["/a".to_string(), "/b/1.0.0".to_string()]);
    }

    #[test]
    fn test_unregister() {
        let registry = HandlerRegistry::new();
        registry.register([id("/x/1.0.0"), id("/x/2.0.0")], |_| async {});
        assert!(registry.unregister(&id("/x/1.0.0")));
        assert!(!registry.unregister(&id("/x/1.0.0")));
        assert!(!registry.is_registered(&id("/x/1.0.0")));
        assert!(registry.is_registered(&id("/x/2.0.0")));
    }
}
