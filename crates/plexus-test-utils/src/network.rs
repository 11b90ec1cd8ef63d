//! Running nodes on an in-memory hub.

use plexus_net::{MemoryHub, NetworkConfig, Node};

use crate::helpers::{eventually, test_network_config, TEST_TIMEOUT};

/// Create and start a node on `hub`.
///
/// # Panics
///
/// Panics if the node fails to start.
pub async fn memory_node(hub: &MemoryHub, config: NetworkConfig) -> Node {
    let node = Node::new(config, hub.transport()).expect("node construction");
    node.start().await.expect("node start");
    node
}

/// A started node with [`test_network_config`].
pub async fn test_node(hub: &MemoryHub) -> Node {
    memory_node(hub, test_network_config()).await
}

/// Make `from` dial `to` and wait until both sides see the connection.
///
/// # Panics
///
/// Panics if the dial fails or either side does not register the
/// connection in time.
pub async fn connect(from: &Node, to: &Node) {
    from.address_book().add(to.peer_id(), to.listen_addrs());
    from.dial(to.peer_id()).await.expect("dial");
    let (from_id, to_id) = (from.peer_id(), to.peer_id());
    assert!(
        eventually(TEST_TIMEOUT, || {
            to.connected_peers().contains(&from_id) && from.connected_peers().contains(&to_id)
        })
        .await,
        "connection between {} and {} not established",
        from_id,
        to_id
    );
}

/// Two started nodes on `hub`, the second connected to the first.
pub async fn connected_pair(hub: &MemoryHub) -> (Node, Node) {
    let first = test_node(hub).await;
    let second = test_node(hub).await;
    connect(&second, &first).await;
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connected_pair() {
        let hub = MemoryHub::new();
        let (a, b) = connected_pair(&hub).await;
        assert_eq!(a.connected_peers(), vec![b.peer_id()]);
        assert_eq!(b.connected_peers(), vec![a.peer_id()]);
    }
}
