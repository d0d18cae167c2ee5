//! Periodic neighbor discovery.
//!
//! Each round asks every active peer for its neighbor list and merges the
//! answers into the local peer set, so membership spreads transitively from
//! a single seed.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::PeerAddress;
use crate::error::{OverlayError, Result};
use crate::node::NodeContext;
use crate::protocol::{Rpc, RpcResponse};

/// A running discovery loop.
pub(crate) struct Discovery {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Discovery {
    /// Spawn the discovery loop. The first round runs immediately.
    pub(crate) fn start(ctx: Arc<NodeContext>, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let task = tokio::spawn(run(ctx, cancel.clone()));
        Self { cancel, task }
    }

    /// Cancel the loop and wait for it to exit. No query starts after this
    /// returns.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Discovery task ended abnormally: {}", e);
        }
    }
}

async fn run(ctx: Arc<NodeContext>, cancel: CancellationToken) {
    let mut ticker = interval(ctx.config.discovery_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Discovery started for {} every {:?}",
        ctx.local, ctx.config.discovery_interval
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // An in-flight round is abandoned on cancellation.
        tokio::select! {
            _ = cancel.cancelled() => break,
            added = discover_round(&ctx) => {
                if added > 0 {
                    debug!("Discovery round added {} peer(s), {} known", added, ctx.peers.len());
                }
            }
        }
    }

    info!("Discovery stopped for {}", ctx.local);
}

/// Query every active peer concurrently and merge the results.
///
/// Returns how many new peers were added. Unreachable peers are skipped.
pub(crate) async fn discover_round(ctx: &NodeContext) -> usize {
    let targets = ctx.peers.active_peers();
    let queries = targets
        .iter()
        .map(|target| async move { (target, request_neighbors(ctx, target).await) });

    let mut added = 0;
    for (target, result) in join_all(queries).await {
        match result {
            Ok(neighbors) => added += ctx.peers.add_peers(&neighbors).len(),
            Err(e) => debug!("Skipping {} this round: {}", target, e),
        }
    }
    added
}

/// Ask `target` for its neighbor list.
pub(crate) async fn request_neighbors(
    ctx: &NodeContext,
    target: &PeerAddress,
) -> Result<Vec<PeerAddress>> {
    let rpc = Rpc::Neighbors {
        from: ctx.local.clone(),
    };

    match ctx.network.request(target, rpc).await? {
        RpcResponse::Neighbors(neighbors) => Ok(neighbors
            .into_iter()
            .filter(|addr| *addr != ctx.local)
            .collect()),
        other => Err(OverlayError::ProtocolError(format!(
            "unexpected response to neighbor query from {}: {:?}",
            target, other
        ))),
    }
}

/// Build the answer to a neighbor query from `from`.
///
/// The requester is registered as a peer, then excluded from the answer.
pub(crate) fn answer_neighbors(ctx: &NodeContext, from: &PeerAddress) -> Vec<PeerAddress> {
    ctx.peers.add_peers(std::iter::once(from));

    ctx.peers
        .peers()
        .into_iter()
        .filter(|addr| addr != from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn addr(s: &str) -> PeerAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_answer_registers_requester_and_excludes_it() {
        let node = Node::new(addr("127.0.0.1:19301")).unwrap();
        let requester = addr("127.0.0.1:19302");
        node.peer_set().add_peers(&[addr("127.0.0.1:19303")]);

        let answer = answer_neighbors(node.context(), &requester);

        assert_eq!(answer, vec![addr("127.0.0.1:19303")]);
        assert!(node.peer_set().contains(&requester));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_answer_to_self_is_not_registered() {
        let node = Node::new(addr("127.0.0.1:19311")).unwrap();

        let answer = answer_neighbors(node.context(), &addr("127.0.0.1:19311"));

        assert!(answer.is_empty());
        assert!(node.peer_set().is_empty());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_round_without_peers_adds_nothing() {
        let node = Node::new(addr("127.0.0.1:19321")).unwrap();
        assert_eq!(discover_round(node.context()).await, 0);
        node.shutdown().await;
    }
}
