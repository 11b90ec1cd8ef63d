//! Helpers shared by unit tests.

use plexus_crypto::Keypair;
use plexus_types::Direction;

use crate::config::MuxConfig;
use crate::muxer::{Muxer, Stream};
use crate::secure::{SecureSession, SecurityUpgrade, SignedX25519Upgrade};
use crate::transport::BoxedIo;

/// Two secure sessions joined by an in-memory pipe.
pub(crate) async fn session_pair() -> (SecureSession, SecureSession) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (a, b): (BoxedIo, BoxedIo) = (Box::new(a), Box::new(b));
    let listener_id = Keypair::generate();
    let accept = tokio::spawn(async move {
        SignedX25519Upgrade::new()
            .secure(b, &listener_id, None)
            .await
            .unwrap()
    });
    let dialed = SignedX25519Upgrade::new()
        .secure(a, &Keypair::generate(), None)
        .await
        .unwrap();
    (dialed, accept.await.unwrap())
}

/// Dialer and listener ends of one multiplexed session.
pub(crate) async fn muxer_pair(config: MuxConfig) -> (Muxer, Muxer) {
    let (a, b) = session_pair().await;
    (
        Muxer::new(a, Direction::Outbound, config),
        Muxer::new(b, Direction::Inbound, config),
    )
}

/// One stream opened by the dialer and accepted by the listener.
pub(crate) async fn stream_pair() -> (Muxer, Muxer, Stream, Stream) {
    let (dialer, listener) = muxer_pair(MuxConfig::default()).await;
    let outbound = dialer.open_stream().await.unwrap();
    let inbound = listener.accept_stream().await.unwrap();
    (dialer, listener, outbound, inbound)
}
