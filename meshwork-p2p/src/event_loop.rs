//! The task that owns the libp2p swarm.
//!
//! Besides driving the swarm, the loop is where connection state lives: it
//! holds the writer side of every tracked peer's state cell and updates it
//! from swarm events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    core::transport::ListenerId,
    noise,
    request_response::{self, OutboundRequestId},
    swarm::{
        dial_opts::{DialOpts, PeerCondition},
        DialError, SwarmEvent,
    },
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver},
    oneshot,
};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::address::PeerAddress;
use crate::behavior::{MeshworkBehaviour, MeshworkBehaviourEvent};
use crate::config::NodeConfig;
use crate::connection::{transition, ConnectionState, StateCell};
use crate::error::{OverlayError, Result};
use crate::network::{Command, InboundRequest};
use crate::protocol::{Rpc, RpcResponse};

type ResponseSender = oneshot::Sender<Result<RpcResponse>>;

/// Build the swarm for the node listening at `local`.
pub(crate) fn build_swarm(local: &PeerAddress, config: &NodeConfig) -> Result<Swarm<MeshworkBehaviour>> {
    let keypair = local.keypair()?;
    let request_timeout = config.request_timeout;
    let idle_timeout = config.idle_connection_timeout;

    let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| OverlayError::NetworkError(format!("TCP error: {}", e)))?
        .with_dns()
        .map_err(|e| OverlayError::NetworkError(format!("DNS error: {}", e)))?
        .with_behaviour(|_key| MeshworkBehaviour::new(request_timeout))
        .map_err(|e| OverlayError::NetworkError(format!("Behaviour error: {}", e)))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(idle_timeout))
        .build();

    Ok(swarm)
}

/// A peer whose connection state is being tracked.
struct TrackedPeer {
    address: PeerAddress,
    multiaddr: Multiaddr,
    state: StateCell,
}

/// Outcome of a dial attempt.
enum DialOutcome {
    Started,
    AlreadyConnected,
    AlreadyDialing,
    Failed(String),
}

pub(crate) struct EventLoop {
    swarm: Swarm<MeshworkBehaviour>,
    command_receiver: UnboundedReceiver<Command>,
    // Peers in some node's peer set, keyed by their derived identity
    peers: HashMap<PeerId, TrackedPeer>,
    // Requests handed to the swarm, waiting for a response
    pending_requests: HashMap<OutboundRequestId, ResponseSender>,
    // Requests waiting for a connection to their target
    queued_requests: HashMap<PeerId, Vec<(Rpc, ResponseSender)>>,
    inbound: Option<mpsc::Sender<InboundRequest>>,
    listener: Option<ListenerId>,
    reconnect_interval: Duration,
}

impl EventLoop {
    pub(crate) fn new(
        swarm: Swarm<MeshworkBehaviour>,
        command_receiver: UnboundedReceiver<Command>,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            swarm,
            command_receiver,
            peers: HashMap::new(),
            pending_requests: HashMap::new(),
            queued_requests: HashMap::new(),
            inbound: None,
            listener: None,
            reconnect_interval,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let mut reconnect_timer = interval(self.reconnect_interval);
        reconnect_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_event(event),
                command = self.command_receiver.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("Command channel closed, exiting the network event loop");
                        break;
                    }
                },
                _ = reconnect_timer.tick() => self.redial_failed_peers(),
                _ = shutdown.cancelled() => {
                    info!("Shutdown triggered, exiting the network event loop");
                    break;
                }
            }
        }

        self.shutdown_peers();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                address,
                peer_id,
                state,
            } => {
                debug!("Tracking peer {} ({})", address, peer_id);
                let multiaddr = address.to_multiaddr();
                self.swarm.add_peer_address(peer_id, multiaddr.clone());

                let tracked = TrackedPeer {
                    address,
                    multiaddr,
                    state,
                };
                if let Some(previous) = self.peers.insert(peer_id, tracked) {
                    transition(&previous.state, ConnectionState::Shutdown);
                }
                self.dial_tracked(peer_id);
            }
            Command::Disconnect {
                address,
                peer_id,
                state,
            } => {
                transition(&state, ConnectionState::Shutdown);
                let is_current = self
                    .peers
                    .get(&peer_id)
                    .map(|tracked| Arc::ptr_eq(&tracked.state, &state))
                    .unwrap_or(false);
                if is_current {
                    debug!("Untracking peer {}", address);
                    self.peers.remove(&peer_id);
                    let _ = self.swarm.disconnect_peer_id(peer_id);
                }
            }
            Command::Request {
                address,
                peer_id,
                rpc,
                response_sender,
            } => {
                if self.swarm.is_connected(&peer_id) {
                    self.send_request(peer_id, rpc, response_sender);
                    return;
                }

                // Requests wait for our own dial. Letting request-response dial
                // on its own would race with it and fail the request.
                self.queued_requests
                    .entry(peer_id)
                    .or_default()
                    .push((rpc, response_sender));

                match self.dial(peer_id, address.to_multiaddr()) {
                    DialOutcome::Started | DialOutcome::AlreadyDialing => {}
                    DialOutcome::AlreadyConnected => self.flush_queued_requests(peer_id),
                    DialOutcome::Failed(reason) => {
                        self.fail_queued_requests(peer_id, &format!("dial {} failed: {}", address, reason))
                    }
                }
            }
            Command::StartListening {
                address,
                inbound,
                response_sender,
            } => {
                let result = match self.swarm.listen_on(address.clone()) {
                    Ok(listener_id) => {
                        info!("Listening on {}", address);
                        self.listener = Some(listener_id);
                        self.inbound = Some(inbound);
                        Ok(())
                    }
                    Err(e) => Err(OverlayError::NetworkError(format!(
                        "Listen error on {}: {}",
                        address, e
                    ))),
                };
                let _ = response_sender.send(result);
            }
            Command::StopListening { response_sender } => {
                if let Some(listener_id) = self.listener.take() {
                    // `remove_listener` is infallible
                    self.swarm.remove_listener(listener_id);
                }
                self.inbound = None;
                let _ = response_sender.send(Ok(()));
            }
            Command::Respond { channel, response } => {
                if self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_response(channel, response)
                    .is_err()
                {
                    debug!("Response channel closed before the answer was sent");
                }
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<MeshworkBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(MeshworkBehaviourEvent::RequestResponse(event)) => {
                self.handle_request_response_event(event);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                debug!("New listen address {}", address);
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!("Connected to peer: {}", peer_id);
                if let Some(tracked) = self.peers.get(&peer_id) {
                    transition(&tracked.state, ConnectionState::Ready);
                }
                self.flush_queued_requests(peer_id);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Disconnected from peer: {}", peer_id);
                if num_established == 0 {
                    if let Some(tracked) = self.peers.get(&peer_id) {
                        transition(&tracked.state, ConnectionState::TransientFailure);
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if self.swarm.is_connected(&peer_id) {
                    return;
                }
                match self.peers.get(&peer_id) {
                    Some(tracked) => {
                        warn!("Failed to connect to {}: {}", tracked.address, error);
                        transition(&tracked.state, ConnectionState::TransientFailure);
                    }
                    None => debug!("Failed to connect to {}: {}", peer_id, error),
                }
                self.fail_queued_requests(peer_id, &format!("dial failed: {}", error));
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                debug!("Incoming connection failed: {}", error);
            }
            _ => {}
        }
    }

    fn handle_request_response_event(&mut self, event: request_response::Event<Rpc, RpcResponse>) {
        use request_response::{Event, Message};

        match event {
            Event::Message { peer, message, .. } => match message {
                Message::Request {
                    request, channel, ..
                } => match &self.inbound {
                    Some(inbound) => {
                        let request = InboundRequest {
                            peer,
                            rpc: request,
                            channel,
                        };
                        match inbound.try_send(request) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(request)) => {
                                // Wait for room off the event loop.
                                trace!("Inbound queue full, parking request from {}", peer);
                                let inbound = inbound.clone();
                                tokio::spawn(async move {
                                    if inbound.send(request).await.is_err() {
                                        debug!("Server stopped, dropping request from {}", peer);
                                    }
                                });
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!("Server stopped, dropping request from {}", peer);
                            }
                        }
                    }
                    None => {
                        debug!("Server not running, dropping request from {}", peer);
                    }
                },
                Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(sender) = self.pending_requests.remove(&request_id) {
                        let _ = sender.send(Ok(response));
                    }
                }
            },
            Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!("Outbound failure to {}: {}", peer, error);
                if let Some(sender) = self.pending_requests.remove(&request_id) {
                    let _ = sender.send(Err(OverlayError::NetworkError(format!(
                        "request to {} failed: {}",
                        peer, error
                    ))));
                }
            }
            Event::InboundFailure { peer, error, .. } => {
                debug!("Inbound failure from {}: {}", peer, error);
            }
            Event::ResponseSent { peer, .. } => {
                trace!("Response sent to {}", peer);
            }
        }
    }

    fn send_request(&mut self, peer_id: PeerId, rpc: Rpc, response_sender: ResponseSender) {
        if response_sender.is_closed() {
            // Caller gave up (timeout) while the request was queued.
            return;
        }
        let request_id = self
            .swarm
            .behaviour_mut()
            .request_response
            .send_request(&peer_id, rpc);
        self.pending_requests.insert(request_id, response_sender);
    }

    fn flush_queued_requests(&mut self, peer_id: PeerId) {
        if let Some(queued) = self.queued_requests.remove(&peer_id) {
            for (rpc, response_sender) in queued {
                self.send_request(peer_id, rpc, response_sender);
            }
        }
    }

    fn fail_queued_requests(&mut self, peer_id: PeerId, reason: &str) {
        if let Some(queued) = self.queued_requests.remove(&peer_id) {
            for (_, response_sender) in queued {
                let _ = response_sender.send(Err(OverlayError::NetworkError(reason.to_string())));
            }
        }
    }

    fn dial(&mut self, peer_id: PeerId, multiaddr: Multiaddr) -> DialOutcome {
        let opts = DialOpts::peer_id(peer_id)
            .addresses(vec![multiaddr])
            .condition(PeerCondition::DisconnectedAndNotDialing)
            .build();

        match self.swarm.dial(opts) {
            Ok(()) => DialOutcome::Started,
            Err(DialError::DialPeerConditionFalse(_)) => {
                if self.swarm.is_connected(&peer_id) {
                    DialOutcome::AlreadyConnected
                } else {
                    DialOutcome::AlreadyDialing
                }
            }
            Err(e) => DialOutcome::Failed(e.to_string()),
        }
    }

    fn dial_tracked(&mut self, peer_id: PeerId) {
        let Some(multiaddr) = self.peers.get(&peer_id).map(|t| t.multiaddr.clone()) else {
            return;
        };
        let outcome = self.dial(peer_id, multiaddr);
        let Some(tracked) = self.peers.get(&peer_id) else {
            return;
        };

        match outcome {
            DialOutcome::Started | DialOutcome::AlreadyDialing => {
                transition(&tracked.state, ConnectionState::Connecting);
            }
            DialOutcome::AlreadyConnected => {
                transition(&tracked.state, ConnectionState::Ready);
            }
            DialOutcome::Failed(reason) => {
                warn!("Failed to dial {}: {}", tracked.address, reason);
                transition(&tracked.state, ConnectionState::TransientFailure);
            }
        }
    }

    fn redial_failed_peers(&mut self) {
        let failed: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, tracked)| *tracked.state.borrow() == ConnectionState::TransientFailure)
            .map(|(peer_id, _)| *peer_id)
            .collect();

        for peer_id in failed {
            trace!("Re-dialing {}", peer_id);
            self.dial_tracked(peer_id);
        }
    }

    fn shutdown_peers(&mut self) {
        for (_, tracked) in self.peers.drain() {
            transition(&tracked.state, ConnectionState::Shutdown);
        }

        // Dropping the senders reports EventLoopClosed to the waiting callers.
        self.pending_requests.clear();
        self.queued_requests.clear();
        self.inbound = None;

        let connected_peers: Vec<PeerId> = self.swarm.connected_peers().cloned().collect();
        for peer in connected_peers {
            let _ = self.swarm.disconnect_peer_id(peer);
        }
    }
}
