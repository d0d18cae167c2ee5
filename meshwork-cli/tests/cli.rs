use std::io::Write;
use std::time::Duration;

use assert_cmd::Command;
use meshwork_p2p::{Node, NodeConfig, PeerAddress};
use predicates::prelude::*;

fn meshwork() -> Command {
    Command::cargo_bin("meshwork").unwrap()
}

fn addr(port: u16) -> PeerAddress {
    PeerAddress::new("127.0.0.1", port).unwrap()
}

#[test]
fn test_help_lists_commands() {
    meshwork()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("neighbors"))
        .stdout(predicate::str::contains("broadcast"));
}

#[test]
fn test_one_shot_help_warns_about_redialing() {
    for command in ["neighbors", "broadcast"] {
        meshwork()
            .args([command, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("keeps redialing it"));
    }
}

#[test]
fn test_invalid_listen_address_exits_with_error() {
    meshwork()
        .args(["run", "--listen", "not-an-address"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid --listen address"));
}

#[test]
fn test_bad_config_file_exits_with_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "discovery_interval = \"soon\"").unwrap();

    meshwork()
        .args(["run", "--listen", "127.0.0.1:19801", "--config"])
        .arg(file.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn test_neighbors_of_unreachable_node_fails() {
    meshwork()
        .args([
            "neighbors",
            "--listen",
            "127.0.0.1:19811",
            "--target",
            "127.0.0.1:19812",
        ])
        .timeout(Duration::from_secs(30))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Neighbor query to 127.0.0.1:19812 failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_neighbors_prints_server_peers() {
    let server = Node::with_config(addr(19821), NodeConfig::default()).unwrap();
    server.start_server().await.unwrap();
    server.peer_set().add_peers(&[addr(19822), addr(19823)]);

    let assert = tokio::task::spawn_blocking(|| {
        meshwork()
            .args([
                "neighbors",
                "--listen",
                "127.0.0.1:19824",
                "--target",
                "127.0.0.1:19821",
                "--json",
            ])
            .timeout(Duration::from_secs(30))
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("127.0.0.1:19822"))
        .stdout(predicate::str::contains("127.0.0.1:19823"))
        .stdout(predicate::str::contains("127.0.0.1:19824").not());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broadcast_is_delivered_by_via_node() {
    let via = Node::with_config(addr(19831), NodeConfig::default()).unwrap();
    via.start_server().await.unwrap();
    let mut deliveries = via.subscribe();

    let assert = tokio::task::spawn_blocking(|| {
        meshwork()
            .args([
                "broadcast",
                "--listen",
                "127.0.0.1:19832",
                "--via",
                "127.0.0.1:19831",
                "--text",
                "Hello",
            ])
            .timeout(Duration::from_secs(30))
            .assert()
    })
    .await
    .unwrap();
    assert.success().stdout(predicate::str::contains("accepted by 127.0.0.1:19831"));

    let envelope = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.payload.as_text(), Some("Hello"));
    assert_eq!(envelope.origin, Some(addr(19832)));
    assert_eq!(via.received_count(), 1);

    via.shutdown().await;
}
