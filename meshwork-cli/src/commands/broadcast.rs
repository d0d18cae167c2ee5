use std::time::{SystemTime, UNIX_EPOCH};

use clap::Args;
use meshwork_p2p::{Envelope, Node, Payload};

use crate::commands::parse_address;
use crate::output;

#[derive(Args)]
pub struct BroadcastArgs {
    /// Address to send from (host:port)
    ///
    /// Nothing listens here, but the target records this address as a peer
    /// and keeps redialing it. Use the address of a node you run, or expect
    /// reconnect noise in the target's logs.
    #[arg(short, long)]
    pub listen: String,

    /// Node that starts the flood (host:port)
    #[arg(short, long)]
    pub via: String,

    /// Message text
    #[arg(short, long)]
    pub text: String,
}

pub async fn run(args: BroadcastArgs) -> i32 {
    let (Some(listen), Some(via)) = (
        parse_address("listen", &args.listen),
        parse_address("via", &args.via),
    ) else {
        return 1;
    };

    let node = match Node::new(listen.clone()) {
        Ok(node) => node,
        Err(e) => {
            output::error(&format!("Failed to create node: {}", e));
            return 1;
        }
    };

    // Each invocation is a fresh process, so the sequence comes from the clock.
    let sequence = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    let envelope = Envelope::sequenced(listen, sequence, Payload::text(args.text));
    let id = envelope.id();

    let result = node.request_broadcast(&via, envelope).await;
    node.shutdown().await;

    match result {
        Ok(()) => {
            output::success(&format!("Message {} accepted by {}", id, via));
            0
        }
        Err(e) => {
            output::error(&format!("Broadcast via {} failed: {}", via, e));
            1
        }
    }
}
