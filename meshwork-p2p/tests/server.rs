mod common;

use std::time::Duration;

use common::{addr, fast_config, init_tracing, serving_node, shutdown_all};
use meshwork_p2p::{Node, OverlayError, Service};
use tokio_test::{assert_err, assert_ok};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_neighbors_excludes_requester() {
    init_tracing();

    let server = serving_node(19701).await;
    let client = Node::with_config(addr(19702), fast_config()).unwrap();

    let neighbors = assert_ok!(client.request_neighbors(server.address()).await);
    assert!(neighbors.is_empty());
    // The server learned about the client from the query.
    assert!(server.peer_set().contains(client.address()));

    server.peer_set().remove_peer(client.address());
    let others = [addr(19703), addr(19704), addr(19705)];
    server.peer_set().add_peers(&others);

    let mut neighbors = assert_ok!(client.request_neighbors(server.address()).await);
    neighbors.sort_by_key(|a| a.port());
    assert_eq!(neighbors, others.to_vec());
    assert!(!neighbors.contains(client.address()));

    shutdown_all(&[server, client]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_to_stopped_server_fails() {
    init_tracing();

    let server = serving_node(19711).await;
    let client = Node::with_config(addr(19712), fast_config()).unwrap();

    assert_ok!(client.request_neighbors(server.address()).await);
    assert_ok!(server.stop_server().await);

    let err = assert_err!(client.request_neighbors(server.address()).await);
    assert!(err.is_transport());

    shutdown_all(&[server, client]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_restarts_on_same_address() {
    init_tracing();

    let server = serving_node(19721).await;
    let client = Node::with_config(addr(19722), fast_config()).unwrap();

    assert_ok!(server.stop_server().await);
    // The listener socket closes on the event loop's next poll.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_ok!(server.start_server().await);

    let neighbors = assert_ok!(client.request_neighbors(server.address()).await);
    assert!(neighbors.is_empty());

    shutdown_all(&[server, client]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_conflict_is_reported() {
    init_tracing();

    let first = serving_node(19731).await;
    let second = Node::with_config(addr(19731), fast_config()).unwrap();

    assert_err!(second.start_server().await);
    assert!(!second.is_serving().await);

    // A failed start leaves the server stopped.
    assert!(matches!(
        second.stop_server().await,
        Err(OverlayError::NotRunning(Service::Server))
    ));

    shutdown_all(&[first, second]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_stops_services() {
    init_tracing();

    let node = serving_node(19741).await;
    assert_ok!(node.start_discover_peers(&addr(19742)).await);

    tokio::time::timeout(Duration::from_secs(5), node.shutdown())
        .await
        .expect("shutdown should not hang");

    assert!(!node.is_serving().await);
    assert!(!node.is_discovering().await);
    assert!(node.peer_set().active_peers().is_empty());
}
