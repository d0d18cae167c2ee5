//! RPC server: accepts inbound neighbor queries and broadcasts.

use std::sync::Arc;

use libp2p::request_response::ResponseChannel;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast;
use crate::discovery;
use crate::error::Result;
use crate::network::InboundRequest;
use crate::node::NodeContext;
use crate::protocol::{Rpc, RpcResponse};

/// A running server. Dropping it without [`Server::stop`] leaves the
/// listener open until the node shuts down.
pub(crate) struct Server {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Server {
    /// Bind the node's address and start serving.
    ///
    /// Bind failures are returned; nothing keeps running in that case.
    pub(crate) async fn start(ctx: Arc<NodeContext>, parent: &CancellationToken) -> Result<Self> {
        let listen_addr = ctx.local.listen_multiaddr().await?;
        let (inbound_tx, inbound_rx) = mpsc::channel(ctx.config.inbound_queue);
        ctx.network.start_listening(listen_addr.clone(), inbound_tx).await?;

        info!("Server for {} listening on {}", ctx.local, listen_addr);

        let cancel = parent.child_token();
        let task = tokio::spawn(serve(ctx, inbound_rx, cancel.clone()));
        Ok(Self { cancel, task })
    }

    /// Stop accepting connections and wait for in-flight handlers to end.
    pub(crate) async fn stop(self, ctx: &NodeContext) -> Result<()> {
        let unbound = ctx.network.stop_listening().await;
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Server task ended abnormally: {}", e);
        }
        info!("Server for {} stopped", ctx.local);
        unbound
    }
}

async fn serve(
    ctx: Arc<NodeContext>,
    mut inbound: mpsc::Receiver<InboundRequest>,
    cancel: CancellationToken,
) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = inbound.recv() => match request {
                Some(request) => {
                    let ctx = ctx.clone();
                    handlers.spawn(async move { handle_request(&ctx, request).await });
                }
                None => break,
            },
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }

    handlers.shutdown().await;
    debug!("Server loop for {} exited", ctx.local);
}

async fn handle_request(ctx: &NodeContext, request: InboundRequest) {
    let InboundRequest { peer, rpc, channel } = request;

    let sender = rpc.sender();
    match sender.peer_id() {
        Ok(claimed) if claimed == peer => {}
        _ => {
            warn!("Ignoring request from {}: it claims to be {}", peer, sender);
            return;
        }
    }

    match rpc {
        Rpc::Neighbors { from } => {
            let neighbors = discovery::answer_neighbors(ctx, &from);
            debug!("Answering neighbor query from {} with {} peer(s)", from, neighbors.len());
            respond(ctx, channel, RpcResponse::Neighbors(neighbors));
        }
        Rpc::Broadcast { from, envelope } => match broadcast::accept(ctx, Some(&from), &envelope) {
            None => respond(ctx, channel, RpcResponse::Ack { duplicate: true }),
            Some(targets) => {
                respond(ctx, channel, RpcResponse::Ack { duplicate: false });
                broadcast::relay(ctx, &envelope, targets).await;
            }
        },
    }
}

fn respond(ctx: &NodeContext, channel: ResponseChannel<RpcResponse>, response: RpcResponse) {
    if let Err(e) = ctx.network.respond(channel, response) {
        debug!("Dropping response: {}", e);
    }
}
