#![allow(dead_code)]

use std::time::Duration;

use meshwork_p2p::{Node, NodeConfig, PeerAddress};

/// Loopback address on `port`.
pub fn addr(port: u16) -> PeerAddress {
    PeerAddress::new("127.0.0.1", port).unwrap()
}

/// Settings tuned for fast convergence on loopback.
pub fn fast_config() -> NodeConfig {
    NodeConfig {
        discovery_interval: Duration::from_millis(100),
        request_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(200),
        ..NodeConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create a node on `port` with its server running.
pub async fn serving_node(port: u16) -> Node {
    let node = Node::with_config(addr(port), fast_config()).unwrap();
    node.start_server().await.unwrap();
    node
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, check: F) -> bool
where
    F: Fn() -> bool,
{
    tokio::time::timeout(limit, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok()
}

pub async fn shutdown_all(nodes: &[Node]) {
    for node in nodes {
        node.shutdown().await;
    }
}
