//! Client side of the network event loop.
//!
//! The libp2p swarm lives inside [`EventLoop`]; everything else holds a
//! cloneable [`Network`] and talks to it through commands.

use std::time::Duration;

use libp2p::{request_response::ResponseChannel, Multiaddr, PeerId};
use tokio::sync::{
    mpsc::{self, UnboundedSender},
    oneshot,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::address::PeerAddress;
use crate::config::NodeConfig;
use crate::connection::StateCell;
use crate::error::{OverlayError, Result};
use crate::event_loop::{build_swarm, EventLoop};
use crate::protocol::{Rpc, RpcResponse};

/// Commands executed by the event loop.
pub(crate) enum Command {
    /// Track a peer and dial it.
    Connect {
        address: PeerAddress,
        peer_id: PeerId,
        state: StateCell,
    },
    /// Stop tracking a peer and close its connections.
    Disconnect {
        address: PeerAddress,
        peer_id: PeerId,
        state: StateCell,
    },
    /// Send an RPC, dialing first if needed.
    Request {
        address: PeerAddress,
        peer_id: PeerId,
        rpc: Rpc,
        response_sender: oneshot::Sender<Result<RpcResponse>>,
    },
    /// Bind the listener and start forwarding inbound RPCs to `inbound`.
    StartListening {
        address: Multiaddr,
        inbound: mpsc::Sender<InboundRequest>,
        response_sender: oneshot::Sender<Result<()>>,
    },
    /// Remove the listener and stop forwarding inbound RPCs.
    StopListening {
        response_sender: oneshot::Sender<Result<()>>,
    },
    /// Answer an inbound RPC.
    Respond {
        channel: ResponseChannel<RpcResponse>,
        response: RpcResponse,
    },
}

/// An RPC received from a remote node, waiting for a response.
pub struct InboundRequest {
    /// Transport identity of the remote
    pub peer: PeerId,
    /// The request
    pub rpc: Rpc,
    /// Where the response goes
    pub channel: ResponseChannel<RpcResponse>,
}

/// Handle to a running network event loop.
#[derive(Clone)]
pub struct Network {
    command_sender: UnboundedSender<Command>,
    request_timeout: Duration,
}

impl Network {
    /// Build the swarm for `local` and spawn its event loop.
    ///
    /// The loop runs until `shutdown` is cancelled or every `Network` handle
    /// is dropped. Must be called inside a tokio runtime.
    pub fn spawn(
        local: &PeerAddress,
        config: &NodeConfig,
        shutdown: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>)> {
        let swarm = build_swarm(local, config)?;
        let (command_sender, command_receiver) = mpsc::unbounded_channel();

        info!("Created network for {} with ID: {}", local, swarm.local_peer_id());

        let event_loop = EventLoop::new(swarm, command_receiver, config.reconnect_interval);
        let handle = tokio::spawn(event_loop.run(shutdown));

        Ok((
            Self {
                command_sender,
                request_timeout: config.request_timeout,
            },
            handle,
        ))
    }

    async fn execute_sync<F, T>(&self, command_creator: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Command,
    {
        let (response_sender, response_receiver) = oneshot::channel();
        self.command_sender
            .send(command_creator(response_sender))
            .map_err(|_| OverlayError::EventLoopClosed)?;
        response_receiver
            .await
            .map_err(|_| OverlayError::EventLoopClosed)?
    }

    /// Send `rpc` to `address` and wait for the answer, bounded by the
    /// configured request timeout.
    pub async fn request(&self, address: &PeerAddress, rpc: Rpc) -> Result<RpcResponse> {
        let peer_id = address.peer_id()?;
        let target = address.clone();

        debug!("Sending {} request to {}", rpc_name(&rpc), address);
        timeout(
            self.request_timeout,
            self.execute_sync(|response_sender| Command::Request {
                address: target,
                peer_id,
                rpc,
                response_sender,
            }),
        )
        .await
        .map_err(|_| OverlayError::Timeout)?
    }

    /// Start listening on `address`; inbound RPCs are forwarded to `inbound`.
    pub async fn start_listening(
        &self,
        address: Multiaddr,
        inbound: mpsc::Sender<InboundRequest>,
    ) -> Result<()> {
        self.execute_sync(|response_sender| Command::StartListening {
            address,
            inbound,
            response_sender,
        })
        .await
    }

    /// Stop listening. Inbound RPCs arriving afterwards are dropped.
    pub async fn stop_listening(&self) -> Result<()> {
        self.execute_sync(|response_sender| Command::StopListening { response_sender })
            .await
    }

    /// Answer an inbound RPC.
    pub fn respond(&self, channel: ResponseChannel<RpcResponse>, response: RpcResponse) -> Result<()> {
        self.command_sender
            .send(Command::Respond { channel, response })
            .map_err(|_| OverlayError::EventLoopClosed)
    }

    pub(crate) fn connect(&self, address: &PeerAddress, state: StateCell) -> Result<()> {
        let peer_id = address.peer_id()?;
        self.command_sender
            .send(Command::Connect {
                address: address.clone(),
                peer_id,
                state,
            })
            .map_err(|_| OverlayError::EventLoopClosed)
    }

    pub(crate) fn disconnect(&self, address: &PeerAddress, state: StateCell) {
        let Ok(peer_id) = address.peer_id() else {
            return;
        };
        // A closed loop has already dropped every connection.
        let _ = self.command_sender.send(Command::Disconnect {
            address: address.clone(),
            peer_id,
            state,
        });
    }
}

fn rpc_name(rpc: &Rpc) -> &'static str {
    match rpc {
        Rpc::Neighbors { .. } => "neighbors",
        Rpc::Broadcast { .. } => "broadcast",
    }
}
