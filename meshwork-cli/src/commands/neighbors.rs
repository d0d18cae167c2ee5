use clap::Args;
use meshwork_p2p::Node;
use serde_json::json;

use crate::commands::parse_address;
use crate::output;

#[derive(Args)]
pub struct NeighborsArgs {
    /// Address to query from (host:port)
    ///
    /// Nothing listens here, but the target records this address as a peer
    /// and keeps redialing it. Use the address of a node you run, or expect
    /// reconnect noise in the target's logs.
    #[arg(short, long)]
    pub listen: String,

    /// Node to ask (host:port)
    #[arg(short, long)]
    pub target: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: NeighborsArgs) -> i32 {
    let (Some(listen), Some(target)) = (
        parse_address("listen", &args.listen),
        parse_address("target", &args.target),
    ) else {
        return 1;
    };

    let node = match Node::new(listen) {
        Ok(node) => node,
        Err(e) => {
            output::error(&format!("Failed to create node: {}", e));
            return 1;
        }
    };

    let result = node.request_neighbors(&target).await;
    node.shutdown().await;

    let mut neighbors = match result {
        Ok(neighbors) => neighbors,
        Err(e) => {
            output::error(&format!("Neighbor query to {} failed: {}", target, e));
            return 1;
        }
    };
    neighbors.sort_by(|a, b| a.host().cmp(b.host()).then(a.port().cmp(&b.port())));

    if args.json {
        let body = json!({
            "success": true,
            "target": target.to_string(),
            "neighbors": neighbors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&body) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                output::error(&format!("Failed to encode output: {}", e));
                return 1;
            }
        }
        return 0;
    }

    output::header(&format!("Neighbors of {}", target));
    output::peer_list(&neighbors);
    output::success(&format!("{} neighbor(s)", neighbors.len()));
    0
}
