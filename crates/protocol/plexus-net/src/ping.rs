//! `/ipfs/ping/1.0.0`: echo random payloads to measure round-trip time.

use std::time::{Duration, Instant};

use plexus_types::PING_SIZE;
use rand::RngCore;
use tracing::{debug, trace};

use crate::error::{NetworkError, NetworkResult};
use crate::muxer::Stream;
use crate::negotiate::InboundStream;

/// Send one ping on a negotiated stream and wait for the echo.
pub(crate) async fn ping(stream: &mut Stream) -> NetworkResult<Duration> {
    let mut payload = [0u8; PING_SIZE];
    rand::thread_rng().fill_bytes(&mut payload);

    let started = Instant::now();
    stream.write(&payload).await?;
    let mut echo = [0u8; PING_SIZE];
    stream.read_exact(&mut echo).await?;
    let rtt = started.elapsed();

    if echo != payload {
        return Err(NetworkError::Decoding("ping payload mismatch".into()));
    }
    trace!(peer = %stream.remote_peer(), rtt_ms = rtt.as_millis() as u64, "Pong");
    Ok(rtt)
}

/// Echo pings until the remote closes the stream.
pub(crate) async fn serve(inbound: InboundStream) {
    let InboundStream { mut stream, peer, .. } = inbound;
    let mut buf = [0u8; PING_SIZE];
    loop {
        match stream.read_exact_or_eof(&mut buf).await {
            Ok(true) => {
                if let Err(e) = stream.write(&buf).await {
                    debug!(peer = %peer, error = %e, "Ping echo failed");
                    return;
                }
            }
            Ok(false) => {
                let _ = stream.close_write().await;
                return;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Ping stream ended");
                return;
            }
        }
    }
}
