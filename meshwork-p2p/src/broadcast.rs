//! Flood broadcast with loop suppression.
//!
//! Every node delivers a message locally the first time it sees its identity
//! and relays it to all of its peers except the one it came from. Later
//! copies are acknowledged and dropped, which is what breaks cycles.

use std::sync::atomic::Ordering;

use futures::future::join_all;
use tracing::{debug, trace, warn};

use crate::address::PeerAddress;
use crate::error::{OverlayError, Result};
use crate::node::NodeContext;
use crate::protocol::{Envelope, Rpc, RpcResponse};

/// Send `envelope` to `via` through the broadcast RPC.
///
/// Returns whether `via` had already seen the message.
pub(crate) async fn request_broadcast(
    ctx: &NodeContext,
    via: &PeerAddress,
    envelope: Envelope,
) -> Result<bool> {
    let rpc = Rpc::Broadcast {
        from: ctx.local.clone(),
        envelope,
    };

    match ctx.network.request(via, rpc).await? {
        RpcResponse::Ack { duplicate } => Ok(duplicate),
        other => Err(OverlayError::ProtocolError(format!(
            "unexpected response to broadcast from {}: {:?}",
            via, other
        ))),
    }
}

/// Dedup-check `envelope` and deliver it locally if it is new.
///
/// Returns the relay targets (every active peer except `from`), or `None`
/// for a message that was already seen.
pub(crate) fn accept(
    ctx: &NodeContext,
    from: Option<&PeerAddress>,
    envelope: &Envelope,
) -> Option<Vec<PeerAddress>> {
    let id = envelope.id();
    if !ctx.cache.insert(id) {
        trace!("Dropping duplicate message {}", id);
        return None;
    }

    ctx.delivered.fetch_add(1, Ordering::SeqCst);
    if ctx.deliveries.send(envelope.clone()).is_err() {
        trace!("No local subscribers for message {}", id);
    }
    debug!("Delivered message {} ({})", id, envelope.payload.kind);

    let targets = ctx
        .peers
        .active_peers()
        .into_iter()
        .filter(|addr| Some(addr) != from)
        .collect();
    Some(targets)
}

/// Relay `envelope` to all `targets` concurrently.
///
/// Failures are logged and never abort the other relays. Returns the number
/// of targets that acknowledged.
pub(crate) async fn relay(ctx: &NodeContext, envelope: &Envelope, targets: Vec<PeerAddress>) -> usize {
    if targets.is_empty() {
        return 0;
    }

    let id = envelope.id();
    debug!("Relaying message {} to {} peer(s)", id, targets.len());

    let sends = targets.iter().map(|target| {
        let envelope = envelope.clone();
        async move { (target, request_broadcast(ctx, target, envelope).await) }
    });

    let mut acknowledged = 0;
    for (target, result) in join_all(sends).await {
        match result {
            Ok(_) => acknowledged += 1,
            Err(e) => warn!("Failed to relay message {} to {}: {}", id, target, e),
        }
    }
    acknowledged
}
