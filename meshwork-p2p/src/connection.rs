//! Outbound peer connections and their observable state.
//!
//! The network event loop owns the truth about every connection and writes it
//! into a shared `watch` cell. A [`Connection`] reads that cell directly, so
//! the state it reports is always the transport's live state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::address::PeerAddress;
use crate::error::Result;
use crate::network::Network;

/// Lifecycle stage of an outbound link to a peer.
///
/// `Idle → Connecting → Ready`, `Ready/Connecting → TransientFailure →
/// Connecting` on retry, and any state `→ Shutdown`. `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Created, no dial issued yet.
    Idle,
    /// Dial in progress.
    Connecting,
    /// At least one live connection.
    Ready,
    /// Last dial failed or the connection dropped; a retry is scheduled.
    TransientFailure,
    /// Closed for good.
    Shutdown,
}

impl ConnectionState {
    /// `Shutdown` never transitions to anything else.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Shutdown)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Ready => "READY",
            ConnectionState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectionState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Shared state cell, written by the event loop and read by [`Connection`].
pub(crate) type StateCell = Arc<watch::Sender<ConnectionState>>;

pub(crate) fn new_state_cell() -> StateCell {
    let (sender, _) = watch::channel(ConnectionState::Idle);
    Arc::new(sender)
}

/// Move `cell` to `next`. Returns false when nothing changed, which is always
/// the case once the cell holds `Shutdown`.
pub(crate) fn transition(cell: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    cell.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        trace!("Connection state {} -> {}", current, next);
        *current = next;
        true
    })
}

/// Handle to the connection with one peer.
///
/// Dropping the handle closes the connection.
pub(crate) struct Connection {
    address: PeerAddress,
    state: StateCell,
    network: Network,
}

impl Connection {
    /// Register the peer with the event loop and start dialing it.
    pub(crate) fn open(address: PeerAddress, network: Network) -> Result<Self> {
        let state = new_state_cell();
        if let Err(e) = network.connect(&address, state.clone()) {
            transition(&state, ConnectionState::Shutdown);
            return Err(e);
        }
        Ok(Self {
            address,
            state,
            network,
        })
    }

    /// Current state, read from the transport. Never blocks.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if transition(&self.state, ConnectionState::Shutdown) {
            debug!("Closing connection to {}", self.address);
            self.network.disconnect(&self.address, self.state.clone());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
