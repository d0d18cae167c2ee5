use std::path::PathBuf;

use clap::Args;
use meshwork_p2p::{Node, NodeConfig};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::parse_address;
use crate::output;

#[derive(Args)]
pub struct RunArgs {
    /// Address this node listens on (host:port)
    #[arg(short, long)]
    pub listen: String,

    /// Seed peer to discover from (repeatable)
    #[arg(short, long)]
    pub seed: Vec<String>,

    /// TOML file with node settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn run(args: RunArgs) -> i32 {
    let Some(listen) = parse_address("listen", &args.listen) else {
        return 1;
    };
    let mut seeds = Vec::with_capacity(args.seed.len());
    for seed in &args.seed {
        let Some(seed) = parse_address("seed", seed) else {
            return 1;
        };
        seeds.push(seed);
    }

    let config = match &args.config {
        Some(path) => match NodeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                output::error(&format!("Failed to load {}: {}", path.display(), e));
                return 1;
            }
        },
        None => NodeConfig::default(),
    };

    let node = match Node::with_config(listen, config) {
        Ok(node) => node,
        Err(e) => {
            output::error(&format!("Failed to create node: {}", e));
            return 1;
        }
    };

    if let Err(e) = node.start_server().await {
        output::error(&format!("Failed to start server on {}: {}", node.address(), e));
        node.shutdown().await;
        return 1;
    }

    output::header("Meshwork node");
    output::kv("Address", &node.address().to_string());
    output::kv(
        "Discovery interval",
        &meshwork_p2p::config::format_duration(node.config().discovery_interval),
    );

    if seeds.is_empty() {
        output::hint("No seeds given; waiting for other nodes to find this one");
    } else {
        if let Err(e) = node.start_discover_peers_from(&seeds).await {
            output::error(&format!("Failed to start discovery: {}", e));
            node.shutdown().await;
            return 1;
        }
        output::kv("Seeds", &seeds.len().to_string());
    }

    output::success("Node running. Press Ctrl-C to stop.");

    let mut deliveries = node.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delivered = deliveries.recv() => match delivered {
                Ok(envelope) => output::delivery(&envelope),
                Err(RecvError::Lagged(skipped)) => {
                    output::warn(&format!("Skipped {} message(s); output fell behind", skipped));
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    output::info("Shutting down...");
    tracing::info!("Stopping node {}", node.address());
    let peers = node.peer_set().len();
    let received = node.received_count();
    node.shutdown().await;

    output::kv("Known peers", &peers.to_string());
    output::kv("Messages received", &received.to_string());
    0
}
