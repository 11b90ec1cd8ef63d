//! Discovery strategies feeding the address book and auto-dial.

use std::sync::Arc;
use std::time::Duration;

use plexus_net::{
    GossipDiscovery, LocalBroadcast, MemoryHub, MemoryMedium, NetworkEvent, PeerId,
    StaticBootstrap,
};
use plexus_test_utils::{
    connect, eventually, init_tracing, memory_node, test_network_config, test_node,
    wait_for_event, within, TEST_TIMEOUT,
};

fn discovered(target: PeerId) -> impl FnMut(&NetworkEvent) -> bool {
    move |event| matches!(event, NetworkEvent::PeerDiscovered { peer, .. } if *peer == target)
}

#[tokio::test]
async fn test_bootstrap_with_auto_dial_connects() {
    init_tracing();
    let hub = MemoryHub::new();
    let seed = test_node(&hub).await;
    let seed_addr = seed.listen_addrs()[0].clone();

    let mut config = test_network_config()
        .with_auto_dial(true)
        .with_bootstrap_node(seed.peer_id(), seed_addr.clone());
    config.discovery.bootstrap_interval = Duration::from_millis(200);

    let node = plexus_net::Node::new(config, hub.transport()).unwrap();
    let mut events = node.subscribe_events();
    node.start().await.unwrap();

    let event = wait_for_event(&mut events, TEST_TIMEOUT, discovered(seed.peer_id()))
        .await
        .expect("bootstrap peer reported");
    match event {
        NetworkEvent::PeerDiscovered { addresses, .. } => assert_eq!(addresses, vec![seed_addr]),
        other => panic!("unexpected event {:?}", other),
    }

    let seed_id = seed.peer_id();
    assert!(eventually(TEST_TIMEOUT, || node.connected_peers().contains(&seed_id)).await);
}

#[tokio::test]
async fn test_bootstrap_without_auto_dial_only_reports() {
    let hub = MemoryHub::new();
    let seed = test_node(&hub).await;
    let node = test_node(&hub).await;
    let mut events = node.subscribe_events();

    node.add_discovery(
        StaticBootstrap::new(vec![(seed.peer_id(), seed.listen_addrs()[0].clone())])
            .with_interval(Duration::from_millis(100)),
    );

    assert!(
        wait_for_event(&mut events, TEST_TIMEOUT, discovered(seed.peer_id()))
            .await
            .is_some()
    );
    assert_eq!(node.address_book().get(&seed.peer_id()), seed.listen_addrs());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(node.connected_peers().is_empty());
}

#[tokio::test]
async fn test_local_broadcast_over_memory_segment() {
    let hub = MemoryHub::new();
    let a = test_node(&hub).await;
    let b = test_node(&hub).await;
    let mut b_events = b.subscribe_events();
    let mut a_events = a.subscribe_events();

    let segment = MemoryMedium::new();
    for node in [&a, &b] {
        node.add_discovery(
            LocalBroadcast::new(Arc::new(segment.attach()))
                .with_interval(Duration::from_millis(100)),
        );
    }

    let event = wait_for_event(&mut b_events, TEST_TIMEOUT, discovered(a.peer_id()))
        .await
        .expect("announcement heard");
    match event {
        NetworkEvent::PeerDiscovered { addresses, .. } => assert_eq!(addresses, a.listen_addrs()),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(
        wait_for_event(&mut a_events, TEST_TIMEOUT, discovered(b.peer_id()))
            .await
            .is_some()
    );

    // Nodes never report themselves.
    let a_id = a.peer_id();
    let mut self_reports = 0;
    while let Some(event) = a_events.try_recv() {
        if event.peer() == Some(&a_id) {
            self_reports += 1;
        }
    }
    assert_eq!(self_reports, 0);

    within(b.dial(a.peer_id())).await.unwrap();
}

#[tokio::test]
async fn test_gossip_discovery_spreads_through_mesh() {
    let hub = MemoryHub::new();
    let a = test_node(&hub).await;
    let b = test_node(&hub).await;
    let c = memory_node(&hub, test_network_config().with_auto_dial(true)).await;
    for node in [&a, &b, &c] {
        node.add_discovery(GossipDiscovery::new().with_interval(Duration::from_millis(100)));
    }
    let mut c_events = c.subscribe_events();

    // a - b - c: c only learns about a through b.
    connect(&a, &b).await;
    connect(&b, &c).await;

    let event = wait_for_event(&mut c_events, TEST_TIMEOUT, discovered(a.peer_id()))
        .await
        .expect("gossip announcement relayed");
    match event {
        NetworkEvent::PeerDiscovered { addresses, .. } => assert_eq!(addresses, a.listen_addrs()),
        other => panic!("unexpected event {:?}", other),
    }

    let a_id = a.peer_id();
    assert!(eventually(TEST_TIMEOUT, || c.connected_peers().contains(&a_id)).await);
}
