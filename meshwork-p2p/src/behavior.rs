//! Libp2p network behavior carrying Meshwork RPCs.

use std::time::Duration;

use libp2p::{
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
    StreamProtocol,
};

use crate::protocol::{Rpc, RpcResponse, PROTOCOL_NAME};

/// Protocol identifier for Meshwork.
pub fn meshwork_protocol() -> StreamProtocol {
    StreamProtocol::new(PROTOCOL_NAME)
}

/// Network behavior for Meshwork: one request-response protocol.
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "MeshworkBehaviourEvent")]
pub struct MeshworkBehaviour {
    /// Request-response for neighbor queries and broadcasts
    pub request_response: request_response::cbor::Behaviour<Rpc, RpcResponse>,
}

/// Events emitted by the Meshwork behavior.
#[derive(Debug)]
pub enum MeshworkBehaviourEvent {
    /// Request-response event
    RequestResponse(request_response::Event<Rpc, RpcResponse>),
}

impl From<request_response::Event<Rpc, RpcResponse>> for MeshworkBehaviourEvent {
    fn from(event: request_response::Event<Rpc, RpcResponse>) -> Self {
        MeshworkBehaviourEvent::RequestResponse(event)
    }
}

impl MeshworkBehaviour {
    /// Create the behavior. Inbound and outbound RPCs are both supported,
    /// and every outbound request is bounded by `request_timeout`.
    pub fn new(request_timeout: Duration) -> Self {
        let request_response = request_response::cbor::Behaviour::new(
            [(meshwork_protocol(), ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(request_timeout),
        );

        Self { request_response }
    }
}
