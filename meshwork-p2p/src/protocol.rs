//! Protocol types for neighbor queries and broadcast delivery.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::PeerAddress;
use crate::error::{OverlayError, Result};

/// Protocol name for Meshwork RPCs.
pub const PROTOCOL_NAME: &str = "/meshwork/rpc/1.0.0";

/// Payload kind used by [`Payload::text`].
pub const TEXT_KIND: &str = "text/plain";

/// Identity of a broadcast message, used as the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId([u8; 32]);

impl MessageId {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs.
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Opaque application payload with a type discriminator.
///
/// The overlay never looks inside `data`; decoding is up to the
/// application layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Type discriminator (e.g. a MIME type or type URL)
    pub kind: String,
    /// Encoded value
    pub data: Vec<u8>,
}

impl Payload {
    /// Create a payload from raw bytes.
    pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }

    /// UTF-8 text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(TEXT_KIND, text.into().into_bytes())
    }

    /// JSON-encoded payload.
    pub fn json<T: Serialize>(kind: impl Into<String>, value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value)
            .map_err(|e| OverlayError::SerializationError(e.to_string()))?;
        Ok(Self::new(kind, data))
    }

    /// The text, if this is a valid text payload.
    pub fn as_text(&self) -> Option<&str> {
        if self.kind != TEXT_KIND {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }

    /// Decode a JSON payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| OverlayError::SerializationError(e.to_string()))
    }
}

/// A broadcast message as it travels through the overlay.
///
/// The identity is recomputed from the fields on every node, so every relay
/// of the same logical message lands on the same dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating node, for sequenced messages
    pub origin: Option<PeerAddress>,
    /// Originator-assigned sequence number (0 for content-addressed messages)
    pub sequence: u64,
    /// Application payload
    pub payload: Payload,
}

impl Envelope {
    /// Content-addressed envelope: equal payloads share an identity.
    pub fn new(payload: Payload) -> Self {
        Self {
            origin: None,
            sequence: 0,
            payload,
        }
    }

    /// Envelope identified by its originator and sequence, so that equal
    /// payloads sent twice are still two messages.
    pub fn sequenced(origin: PeerAddress, sequence: u64, payload: Payload) -> Self {
        Self {
            origin: Some(origin),
            sequence,
            payload,
        }
    }

    /// Compute the message identity.
    pub fn id(&self) -> MessageId {
        let mut hasher = Sha256::new();
        match &self.origin {
            Some(origin) => {
                let origin = origin.to_string();
                hasher.update([1u8]);
                hasher.update((origin.len() as u64).to_le_bytes());
                hasher.update(origin.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.sequence.to_le_bytes());
        hasher.update((self.payload.kind.len() as u64).to_le_bytes());
        hasher.update(self.payload.kind.as_bytes());
        hasher.update((self.payload.data.len() as u64).to_le_bytes());
        hasher.update(&self.payload.data);
        MessageId(hasher.finalize().into())
    }
}

/// Request sent between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Rpc {
    /// "Who are your peers?"
    Neighbors {
        /// Listen address of the requester
        from: PeerAddress,
    },
    /// Deliver (and relay) a broadcast message.
    Broadcast {
        /// Listen address of the sender, excluded from the relay
        from: PeerAddress,
        /// The message
        envelope: Envelope,
    },
}

impl Rpc {
    /// Listen address of the node that sent this request.
    pub fn sender(&self) -> &PeerAddress {
        match self {
            Rpc::Neighbors { from } | Rpc::Broadcast { from, .. } => from,
        }
    }
}

/// Response to an [`Rpc`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    /// Snapshot of the responder's peer set, without the requester.
    Neighbors(Vec<PeerAddress>),
    /// Broadcast accepted.
    Ack {
        /// The responder had already seen this message
        duplicate: bool,
    },
}
