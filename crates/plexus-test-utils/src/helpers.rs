//! Helper functions for creating test fixtures.
//!
//! Provides tracing setup, identities, a memory-transport config and
//! helpers for waiting on asynchronous conditions.

use std::future::Future;
use std::time::Duration;

use plexus_crypto::{Keypair, PeerId};
use plexus_net::{EventReceiver, NetworkConfig, NetworkEvent};
use plexus_types::Multiaddr;
use tracing_subscriber::EnvFilter;

/// Default time a test waits for something to happen.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh random identity.
pub fn test_identity() -> Keypair {
    Keypair::generate()
}

/// A random peer id with no node behind it.
pub fn test_peer_id() -> PeerId {
    Keypair::generate().peer_id()
}

/// The in-memory listen address with a hub-allocated port.
pub fn memory_listen_addr() -> Multiaddr {
    Multiaddr::empty().with(plexus_types::Protocol::Memory(0))
}

/// Config for a node on a memory hub.
///
/// Auto-dial is off and timeouts are short so failures surface quickly.
pub fn test_network_config() -> NetworkConfig {
    NetworkConfig::new()
        .with_listen_addresses(vec![memory_listen_addr()])
        .with_auto_dial(false)
        .with_dial_timeout(Duration::from_secs(2))
        .with_handshake_timeout(Duration::from_secs(2))
        .with_negotiation_timeout(Duration::from_secs(2))
}

/// Wait until `events` yields an event matching `predicate`.
///
/// Returns `None` on timeout or when the node is gone.
pub async fn wait_for_event<F>(
    events: &mut EventReceiver,
    timeout: Duration,
    mut predicate: F,
) -> Option<NetworkEvent>
where
    F: FnMut(&NetworkEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run `fut` with [`TEST_TIMEOUT`], panicking if it does not finish.
pub async fn within<F: Future>(fut: F) -> F::Output {
    match tokio::time::timeout(TEST_TIMEOUT, fut).await {
        Ok(output) => output,
        Err(_) => panic!("operation did not finish within {:?}", TEST_TIMEOUT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_uses_memory() {
        let config = test_network_config();
        assert_eq!(config.listen_addresses[0].to_string(), "/memory/0");
        assert!(!config.auto_dial);
    }

    #[tokio::test]
    async fn test_eventually() {
        assert!(eventually(Duration::from_millis(50), || true).await);
        assert!(!eventually(Duration::from_millis(30), || false).await);
    }
}
