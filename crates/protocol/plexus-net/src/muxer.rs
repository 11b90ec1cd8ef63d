//! Stream multiplexer.
//!
//! Splits one [`SecureSession`] into many independent logical streams. Each
//! secure message carries exactly one [`MuxFrame`].
//!
//! Two background tasks run per session:
//!
//! - the reader decodes frames and routes them to per-stream buffers
//! - the writer drains a bounded outbound frame queue into the session
//!
//! Each stream is flow controlled with send credit. A stream starts with no
//! credit in either direction; each side grants its peer `max_buffered_bytes`
//! with a `WindowUpdate` frame as soon as it tracks the stream, and returns
//! credit as its reader drains the buffer. A writer without credit waits.
//! A peer that sends past its credit overflows the hard cap: the stream is
//! reset and the reader sees `StreamOverflow`.
//!
//! When the session ends, every stream is reset and pending calls fail with
//! `SessionClosed`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use plexus_crypto::PeerId;
use plexus_types::{Direction, ProtocolId, MAX_MUX_PAYLOAD};
use plexus_wire::{FrameKind, MuxFrame, StreamId};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::MuxConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::secure::{SecureReader, SecureSession, SecureWriter};

/// Lifecycle of a logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Both directions open.
    Open,
    /// We closed our write side; the remote may still send.
    LocalClosed,
    /// The remote closed its write side; we may still send.
    RemoteClosed,
    /// Both directions closed.
    Closed,
    /// Aborted by either side or by session close.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetReason {
    Local,
    Remote,
    Overflow { limit: usize },
    SessionClosed,
}

impl ResetReason {
    fn error(self) -> NetworkError {
        match self {
            ResetReason::Local | ResetReason::Remote => NetworkError::StreamReset,
            ResetReason::Overflow { limit } => NetworkError::StreamOverflow { limit },
            ResetReason::SessionClosed => NetworkError::SessionClosed,
        }
    }
}

#[derive(Debug, Default)]
struct StreamInner {
    buffer: VecDeque<Bytes>,
    buffered: usize,
    /// Bytes we may still send before the remote grants more.
    send_window: usize,
    /// Bytes read since credit was last returned.
    consumed: usize,
    local_closed: bool,
    remote_closed: bool,
    reset: Option<ResetReason>,
}

impl StreamInner {
    fn state(&self) -> StreamState {
        match (self.reset, self.local_closed, self.remote_closed) {
            (Some(_), _, _) => StreamState::Reset,
            (None, true, true) => StreamState::Closed,
            (None, true, false) => StreamState::LocalClosed,
            (None, false, true) => StreamState::RemoteClosed,
            (None, false, false) => StreamState::Open,
        }
    }

    fn finished(&self) -> bool {
        self.reset.is_some() || (self.local_closed && self.remote_closed)
    }

    fn reset(&mut self, reason: ResetReason) {
        if self.reset.is_none() {
            self.reset = Some(reason);
        }
        self.buffer.clear();
        self.buffered = 0;
    }
}

#[derive(Debug)]
struct StreamShared {
    inner: Mutex<StreamInner>,
    notify: Notify,
}

impl StreamShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StreamInner::default()),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        // The critical sections never panic; recover the data if one did.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct MuxShared {
    remote_peer: PeerId,
    direction: Direction,
    config: MuxConfig,
    outbound: mpsc::Sender<MuxFrame>,
    streams: Mutex<HashMap<StreamId, Arc<StreamShared>>>,
    next_id: AtomicU32,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Stream>>,
    closed: CancellationToken,
}

impl MuxShared {
    fn streams(&self) -> MutexGuard<'_, HashMap<StreamId, Arc<StreamShared>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_local_id(&self, id: StreamId) -> bool {
        let odd = id % 2 == 1;
        odd == self.direction.is_outbound()
    }

    fn remove(&self, id: StreamId) {
        self.streams().remove(&id);
    }

    /// Queue a control frame without waiting.
    ///
    /// Used from the reader task and from `Drop`, which must not block on a
    /// full queue.
    fn send_control(&self, frame: MuxFrame) {
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let outbound = self.outbound.clone();
                    handle.spawn(async move {
                        let _ = outbound.send(frame).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Credit granted to the remote for a fresh stream.
    fn initial_credit(&self) -> u32 {
        u32::try_from(self.config.max_buffered_bytes).unwrap_or(u32::MAX)
    }

    /// Credit to return once `consumed` bytes were read, if it is due.
    fn credit_due(&self, consumed: usize) -> Option<u32> {
        let threshold = (self.config.max_buffered_bytes / 2).max(1);
        (consumed >= threshold).then(|| u32::try_from(consumed).unwrap_or(u32::MAX))
    }

    fn reset_all(&self, reason: ResetReason) {
        let streams: Vec<_> = self.streams().drain().map(|(_, s)| s).collect();
        for stream in streams {
            stream.lock().reset(reason);
            stream.notify.notify_waiters();
        }

        // Inbound streams nobody accepted would otherwise keep this state alive.
        if let Ok(mut incoming) = self.incoming.try_lock() {
            incoming.close();
            while incoming.try_recv().is_ok() {}
        }
    }
}

/// A multiplexed secure session.
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct Muxer {
    shared: Arc<MuxShared>,
}

impl Muxer {
    /// Start multiplexing `session`.
    ///
    /// `direction` is `Outbound` on the dialing side, which allocates odd
    /// stream ids; the listening side allocates even ids.
    pub fn new(session: SecureSession, direction: Direction, config: MuxConfig) -> Self {
        let remote_peer = session.remote_peer();
        let (reader, writer) = session.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (incoming_tx, incoming_rx) = mpsc::channel(config.max_streams.max(1));

        let first_id = if direction.is_outbound() { 1 } else { 2 };
        let shared = Arc::new(MuxShared {
            remote_peer,
            direction,
            config,
            outbound: outbound_tx,
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(first_id),
            incoming: tokio::sync::Mutex::new(incoming_rx),
            closed: CancellationToken::new(),
        });

        tokio::spawn(write_loop(writer, outbound_rx, shared.closed.clone()));
        tokio::spawn(read_loop(reader, Arc::clone(&shared), incoming_tx));

        Self { shared }
    }

    /// The remote end of the session.
    pub fn remote_peer(&self) -> PeerId {
        self.shared.remote_peer
    }

    /// Open a new outbound stream.
    pub async fn open_stream(&self) -> NetworkResult<Stream> {
        if self.is_closed() {
            return Err(NetworkError::SessionClosed);
        }

        let id = self.shared.next_id.fetch_add(2, Ordering::Relaxed);
        if id >= u32::MAX - 1 {
            return Err(NetworkError::Transport("stream ids exhausted".into()));
        }

        let stream = StreamShared::new();
        self.shared.streams().insert(id, Arc::clone(&stream));

        let credit = self.shared.initial_credit();
        for frame in [MuxFrame::open(id), MuxFrame::window_update(id, credit)] {
            if self.shared.outbound.send(frame).await.is_err() {
                self.shared.remove(id);
                return Err(NetworkError::SessionClosed);
            }
        }

        trace!(stream = id, remote = %self.shared.remote_peer, "Stream opened");
        Ok(Stream::new(id, stream, Arc::clone(&self.shared)))
    }

    /// Wait for the next inbound stream.
    pub async fn accept_stream(&self) -> NetworkResult<Stream> {
        let mut incoming = self.shared.incoming.lock().await;
        tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => Err(NetworkError::SessionClosed),
            stream = incoming.recv() => stream.ok_or(NetworkError::SessionClosed),
        }
    }

    /// Close the session. Every open stream is reset.
    pub fn close(&self) {
        if !self.shared.closed.is_cancelled() {
            debug!(remote = %self.shared.remote_peer, "Closing multiplexed session");
        }
        self.shared.closed.cancel();
        self.shared.reset_all(ResetReason::SessionClosed);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the session has closed.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Streams currently tracked by the session.
    pub fn stream_count(&self) -> usize {
        self.shared.streams().len()
    }
}

async fn write_loop(
    mut writer: SecureWriter,
    mut outbound: mpsc::Receiver<MuxFrame>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Session write failed");
            closed.cancel();
            return;
        }
    }

    // Flush what was queued before the close.
    while let Ok(frame) = outbound.try_recv() {
        if write_frame(&mut writer, &frame).await.is_err() {
            break;
        }
    }
    let _ = writer.close().await;
    closed.cancel();
}

async fn write_frame(writer: &mut SecureWriter, frame: &MuxFrame) -> NetworkResult<()> {
    let bytes = frame.encode()?;
    writer.send(&bytes).await
}

async fn read_loop(
    mut reader: SecureReader,
    shared: Arc<MuxShared>,
    incoming: mpsc::Sender<Stream>,
) {
    loop {
        let message = tokio::select! {
            _ = shared.closed.cancelled() => break,
            message = reader.receive() => message,
        };

        let bytes = match message {
            Ok(bytes) => bytes,
            Err(NetworkError::SessionClosed) => {
                debug!(remote = %shared.remote_peer, "Session ended by remote");
                break;
            }
            Err(e) => {
                debug!(remote = %shared.remote_peer, error = %e, "Session read failed");
                break;
            }
        };

        match MuxFrame::decode(&bytes) {
            Ok(frame) => handle_frame(&shared, &incoming, frame),
            Err(e) => {
                warn!(remote = %shared.remote_peer, error = %e, "Invalid mux frame, closing session");
                break;
            }
        }
    }

    shared.closed.cancel();
    shared.reset_all(ResetReason::SessionClosed);
}

fn handle_frame(shared: &Arc<MuxShared>, incoming: &mpsc::Sender<Stream>, frame: MuxFrame) {
    let id = frame.stream_id;
    match frame.kind {
        FrameKind::Open => {
            if shared.is_local_id(id) {
                warn!(stream = id, "Remote opened a stream with our id parity");
                shared.send_control(MuxFrame::reset(id));
                return;
            }

            let stream = {
                let mut streams = shared.streams();
                if streams.contains_key(&id) {
                    warn!(stream = id, "Remote reopened a live stream");
                    return;
                }
                let inbound = streams.keys().filter(|s| !shared.is_local_id(**s)).count();
                if inbound >= shared.config.max_streams {
                    drop(streams);
                    warn!(stream = id, max = shared.config.max_streams, "Inbound stream limit reached");
                    shared.send_control(MuxFrame::reset(id));
                    return;
                }
                let stream = StreamShared::new();
                streams.insert(id, Arc::clone(&stream));
                stream
            };
            shared.send_control(MuxFrame::window_update(id, shared.initial_credit()));

            let handle = Stream::new(id, stream, Arc::clone(shared));
            if incoming.try_send(handle).is_err() {
                // Dropping the rejected handle resets the stream.
                debug!(stream = id, "No room for inbound stream");
            } else {
                trace!(stream = id, "Inbound stream accepted");
            }
        }

        FrameKind::Data => {
            let Some(stream) = shared.streams().get(&id).cloned() else {
                trace!(stream = id, "Data for unknown stream");
                return;
            };

            let overflow = {
                let mut inner = stream.lock();
                if inner.reset.is_some() || inner.remote_closed {
                    return;
                }
                let len = frame.payload.len();
                if inner.buffered + len > shared.config.max_buffered_bytes {
                    inner.reset(ResetReason::Overflow {
                        limit: shared.config.max_buffered_bytes,
                    });
                    true
                } else {
                    inner.buffered += len;
                    inner.buffer.push_back(Bytes::from(frame.payload));
                    false
                }
            };

            if overflow {
                warn!(
                    stream = id,
                    limit = shared.config.max_buffered_bytes,
                    "Stream buffer overflow, resetting"
                );
                shared.remove(id);
                shared.send_control(MuxFrame::reset(id));
            }
            stream.notify.notify_waiters();
        }

        FrameKind::WindowUpdate => {
            let credit = match frame.credit() {
                Ok(credit) => credit,
                Err(e) => {
                    warn!(stream = id, error = %e, "Invalid window update");
                    return;
                }
            };
            let Some(stream) = shared.streams().get(&id).cloned() else {
                return;
            };
            {
                let mut inner = stream.lock();
                inner.send_window = inner.send_window.saturating_add(credit as usize);
            }
            stream.notify.notify_waiters();
        }

        FrameKind::Close => {
            let Some(stream) = shared.streams().get(&id).cloned() else {
                return;
            };
            let finished = {
                let mut inner = stream.lock();
                inner.remote_closed = true;
                inner.finished()
            };
            if finished {
                shared.remove(id);
            }
            stream.notify.notify_waiters();
        }

        FrameKind::Reset => {
            let Some(stream) = shared.streams().remove(&id) else {
                return;
            };
            trace!(stream = id, "Stream reset by remote");
            stream.lock().reset(ResetReason::Remote);
            stream.notify.notify_waiters();
        }
    }
}

/// A logical duplex byte stream inside a multiplexed session.
///
/// Bytes are delivered in send order. Dropping a stream that is still open
/// resets it.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    shared: Arc<StreamShared>,
    mux: Arc<MuxShared>,
    protocol: Option<ProtocolId>,
    pending: Bytes,
}

impl Stream {
    fn new(id: StreamId, shared: Arc<StreamShared>, mux: Arc<MuxShared>) -> Self {
        Self {
            id,
            shared,
            mux,
            protocol: None,
            pending: Bytes::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn remote_peer(&self) -> PeerId {
        self.mux.remote_peer
    }

    /// The negotiated protocol, or `None` while negotiation is pending.
    pub fn protocol(&self) -> Option<&ProtocolId> {
        self.protocol.as_ref()
    }

    /// Record the negotiated protocol. It cannot change afterwards.
    pub(crate) fn set_protocol(&mut self, protocol: ProtocolId) {
        if self.protocol.is_none() {
            self.protocol = Some(protocol);
        }
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().state()
    }

    /// Read the next chunk. `Ok(None)` means the remote closed its write side.
    pub async fn read(&mut self) -> NetworkResult<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }

        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = self.shared.lock();
                if let Some(reason) = inner.reset {
                    return Err(reason.error());
                }
                if let Some(chunk) = inner.buffer.pop_front() {
                    inner.buffered -= chunk.len();
                    inner.consumed += chunk.len();
                    if !inner.remote_closed {
                        if let Some(credit) = self.mux.credit_due(inner.consumed) {
                            inner.consumed = 0;
                            self.mux.send_control(MuxFrame::window_update(self.id, credit));
                        }
                    }
                    return Ok(Some(chunk));
                }
                if inner.remote_closed {
                    return Ok(None);
                }
            }
            if self.mux.closed.is_cancelled() {
                return Err(NetworkError::SessionClosed);
            }

            tokio::select! {
                _ = notified => {}
                _ = self.mux.closed.cancelled() => {}
            }
        }
    }

    /// Fill `buf` completely. Returns `false` on a clean EOF before any byte.
    pub(crate) async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> NetworkResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(mut chunk) = self.read().await? else {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            };

            let take = chunk.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
            if take < chunk.len() {
                self.pending = chunk.split_off(take);
            }
        }
        Ok(true)
    }

    /// Fill `buf` completely.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        if buf.is_empty() || self.read_exact_or_eof(buf).await? {
            Ok(())
        } else {
            Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
        }
    }

    /// Read until the remote closes its write side.
    pub async fn read_to_end(&mut self) -> NetworkResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Write all of `data`, waiting for send credit and queue space as needed.
    pub async fn write(&mut self, data: &[u8]) -> NetworkResult<()> {
        let mut rest = data;
        loop {
            let take = self.reserve(rest.len()).await?;
            if take == 0 {
                return Ok(());
            }
            let (chunk, tail) = rest.split_at(take);
            self.mux
                .outbound
                .send(MuxFrame::data(self.id, chunk.to_vec()))
                .await
                .map_err(|_| NetworkError::SessionClosed)?;
            rest = tail;
        }
    }

    /// Wait for credit and claim up to `wanted` bytes of it, at most one frame.
    async fn reserve(&self, wanted: usize) -> NetworkResult<usize> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = self.shared.lock();
                if let Some(reason) = inner.reset {
                    return Err(reason.error());
                }
                if inner.local_closed {
                    return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
                }
                if wanted == 0 {
                    return Ok(0);
                }
                if inner.send_window > 0 {
                    let take = wanted.min(inner.send_window).min(MAX_MUX_PAYLOAD);
                    inner.send_window -= take;
                    return Ok(take);
                }
            }
            if self.mux.closed.is_cancelled() {
                return Err(NetworkError::SessionClosed);
            }

            trace!(stream = self.id, "Waiting for send credit");
            tokio::select! {
                _ = notified => {}
                _ = self.mux.closed.cancelled() => {}
            }
        }
    }

    /// Close our write side. The remote sees EOF after the queued bytes.
    pub async fn close_write(&mut self) -> NetworkResult<()> {
        {
            let mut inner = self.shared.lock();
            if let Some(reason) = inner.reset {
                return Err(reason.error());
            }
            if inner.local_closed {
                return Ok(());
            }
            inner.local_closed = true;
        }

        let result = self
            .mux
            .outbound
            .send(MuxFrame::close(self.id))
            .await
            .map_err(|_| NetworkError::SessionClosed);

        if self.shared.lock().finished() {
            self.mux.remove(self.id);
        }
        result
    }

    /// Abort the stream in both directions.
    pub fn reset(&mut self) {
        let was_live = {
            let mut inner = self.shared.lock();
            let live = inner.reset.is_none();
            inner.reset(ResetReason::Local);
            live
        };
        self.mux.remove(self.id);
        if was_live {
            trace!(stream = self.id, "Stream reset locally");
            self.mux.send_control(MuxFrame::reset(self.id));
        }
        self.shared.notify.notify_waiters();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let finished = self.shared.lock().finished();
        if finished {
            self.mux.remove(self.id);
        } else {
            self.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{muxer_pair, session_pair};
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_ids_follow_parity() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;

        let a = dialer.open_stream().await.unwrap();
        let b = dialer.open_stream().await.unwrap();
        let c = listener.open_stream().await.unwrap();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 3);
        assert_eq!(c.id(), 2);

        let accepted = listener.accept_stream().await.unwrap();
        assert_eq!(accepted.id(), 1);
    }

    #[tokio::test]
    async fn test_bytes_arrive_in_order() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();

        let writer = tokio::spawn(async move {
            for i in 0..200u32 {
                outbound.write(&i.to_be_bytes()).await.unwrap();
            }
            outbound.close_write().await.unwrap();
            outbound
        });

        let mut inbound = listener.accept_stream().await.unwrap();
        let data = inbound.read_to_end().await.unwrap();
        let expected: Vec<u8> = (0..200u32).flat_map(|i| i.to_be_bytes()).collect();
        assert_eq!(data, expected);
        let _outbound = writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_large_write_is_chunked() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        let payload: Vec<u8> = (0..(MAX_MUX_PAYLOAD * 3 + 17)).map(|i| i as u8).collect();
        let sent = payload.clone();

        let writer = tokio::spawn(async move {
            outbound.write(&sent).await.unwrap();
            outbound.close_write().await.unwrap();
            outbound
        });

        let mut inbound = listener.accept_stream().await.unwrap();
        assert_eq!(inbound.read_to_end().await.unwrap(), payload);
        let _outbound = writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_half_close() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        outbound.write(b"request").await.unwrap();
        outbound.close_write().await.unwrap();
        assert_eq!(outbound.state(), StreamState::LocalClosed);

        let mut inbound = listener.accept_stream().await.unwrap();
        assert_eq!(inbound.read_to_end().await.unwrap(), b"request");
        assert_eq!(inbound.state(), StreamState::RemoteClosed);

        // The remote can still answer after our half close.
        inbound.write(b"response").await.unwrap();
        inbound.close_write().await.unwrap();
        assert_eq!(inbound.state(), StreamState::Closed);

        assert_eq!(outbound.read_to_end().await.unwrap(), b"response");
        assert_eq!(outbound.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (dialer, _listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        outbound.close_write().await.unwrap();
        assert!(outbound.write(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_read_exact_spans_chunks() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        outbound.write(b"ab").await.unwrap();
        outbound.write(b"cdef").await.unwrap();

        let mut inbound = listener.accept_stream().await.unwrap();
        let mut buf = [0u8; 3];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"def");
    }

    #[tokio::test]
    async fn test_reset_reaches_remote() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        outbound.write(b"x").await.unwrap();
        let mut inbound = listener.accept_stream().await.unwrap();

        outbound.reset();
        assert_eq!(outbound.state(), StreamState::Reset);

        // Pending data is discarded once the reset lands.
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match inbound.read().await {
                    Ok(Some(_)) => continue,
                    other => return other,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(result, Err(NetworkError::StreamReset)));
    }

    #[tokio::test]
    async fn test_slow_reader_throttles_writer() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
        let sent = payload.clone();

        let writer = tokio::spawn(async move {
            outbound.write(&sent).await.unwrap();
            outbound.close_write().await.unwrap();
            outbound
        });

        let mut inbound = listener.accept_stream().await.unwrap();
        let mut received = Vec::with_capacity(payload.len());
        let result = tokio::time::timeout(Duration::from_secs(60), async {
            while let Some(chunk) = inbound.read().await? {
                received.extend_from_slice(&chunk);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok::<_, NetworkError>(())
        })
        .await
        .unwrap();

        assert!(result.is_ok(), "slow reader failed: {:?}", result);
        assert_eq!(received.len(), payload.len());
        assert_eq!(received, payload);
        let _outbound = writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_waits_for_credit() {
        let config = MuxConfig {
            max_buffered_bytes: 1024,
            ..MuxConfig::default()
        };
        let (dialer, listener) = muxer_pair(config).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        let mut inbound = listener.accept_stream().await.unwrap();

        // More than the window: the write cannot finish until the reader drains.
        let mut write = Box::pin(outbound.write(&[7u8; 4096]));
        assert!(tokio::time::timeout(Duration::from_millis(200), &mut write)
            .await
            .is_err());

        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            inbound.read_exact(&mut buf).await.map(|_| buf)
        });
        tokio::time::timeout(Duration::from_secs(5), write)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), vec![7u8; 4096]);
    }

    #[tokio::test]
    async fn test_sending_past_credit_overflows() {
        let config = MuxConfig {
            max_buffered_bytes: 1024,
            ..MuxConfig::default()
        };
        let (mut raw, session) = session_pair().await;
        let listener = Muxer::new(session, Direction::Inbound, config);

        // A peer that ignores the window it was granted.
        raw.send(&MuxFrame::open(1).encode().unwrap()).await.unwrap();
        raw.send(&MuxFrame::data(1, vec![0u8; 2048]).encode().unwrap())
            .await
            .unwrap();

        let mut inbound = listener.accept_stream().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), inbound.read())
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(NetworkError::StreamOverflow { limit: 1024 })
        ));

        // The session itself survives.
        raw.send(&MuxFrame::open(3).encode().unwrap()).await.unwrap();
        raw.send(&MuxFrame::data(3, b"still alive".to_vec()).encode().unwrap())
            .await
            .unwrap();
        let mut accepted = listener.accept_stream().await.unwrap();
        assert_eq!(accepted.read().await.unwrap().unwrap(), &b"still alive"[..]);
    }

    #[tokio::test]
    async fn test_inbound_stream_limit() {
        let config = MuxConfig {
            max_streams: 1,
            ..MuxConfig::default()
        };
        let (dialer, listener) = muxer_pair(config).await;
        let _first = dialer.open_stream().await.unwrap();
        let mut second = dialer.open_stream().await.unwrap();

        let _accepted = listener.accept_stream().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), second.read())
            .await
            .unwrap();
        assert!(matches!(result, Err(NetworkError::StreamReset)));
    }

    #[tokio::test]
    async fn test_close_fails_pending_operations() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let _outbound = dialer.open_stream().await.unwrap();
        let mut inbound = listener.accept_stream().await.unwrap();

        let listener_accept = listener.clone();
        let pending_read = tokio::spawn(async move { inbound.read().await });
        let pending_accept = tokio::spawn(async move { listener_accept.accept_stream().await });
        tokio::task::yield_now().await;

        listener.close();

        assert!(matches!(
            pending_read.await.unwrap(),
            Err(NetworkError::SessionClosed)
        ));
        assert!(matches!(
            pending_accept.await.unwrap(),
            Err(NetworkError::SessionClosed)
        ));
        assert!(matches!(
            listener.open_stream().await,
            Err(NetworkError::SessionClosed)
        ));
        assert_eq!(listener.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_close_propagates() {
        let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
        let mut outbound = dialer.open_stream().await.unwrap();
        let _inbound = listener.accept_stream().await.unwrap();

        listener.close();
        tokio::time::timeout(Duration::from_secs(5), dialer.closed())
            .await
            .unwrap();
        assert!(matches!(
            outbound.read().await,
            Err(NetworkError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropped_stream_is_removed() {
        let (dialer, _listener) = muxer_pair(MuxConfig::default()).await;
        let outbound = dialer.open_stream().await.unwrap();
        assert_eq!(dialer.stream_count(), 1);
        drop(outbound);
        assert_eq!(dialer.stream_count(), 0);
    }
}
