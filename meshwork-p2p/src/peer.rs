//! Peer set: the registry of known peers and their connections.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::address::PeerAddress;
use crate::connection::{Connection, ConnectionState};
use crate::error::{OverlayError, Result};
use crate::network::Network;

/// A known remote node and the connection to it.
#[derive(Debug)]
pub(crate) struct Peer {
    connection: Connection,
}

impl Peer {
    fn state(&self) -> ConnectionState {
        self.connection.state()
    }
}

/// Concurrency-safe registry of the peers a node knows about.
///
/// Never contains the local address. Each entry owns its connection; removing
/// the entry closes it.
pub struct PeerSet {
    local: PeerAddress,
    network: Network,
    peers: RwLock<HashMap<PeerAddress, Peer>>,
}

impl PeerSet {
    /// Create an empty peer set for the node at `local`.
    pub fn new(local: PeerAddress, network: Network) -> Self {
        Self {
            local,
            network,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Address of the owning node.
    pub fn local_address(&self) -> &PeerAddress {
        &self.local
    }

    /// Add peers and start connecting to them.
    ///
    /// The local address and addresses already present are skipped, whatever
    /// the state of their connection. Returns the addresses that were
    /// actually added.
    pub fn add_peers<'a, I>(&self, addrs: I) -> Vec<PeerAddress>
    where
        I: IntoIterator<Item = &'a PeerAddress>,
    {
        let mut added = Vec::new();
        let mut peers = self.peers.write();

        for addr in addrs {
            if *addr == self.local || peers.contains_key(addr) {
                continue;
            }

            let connection = match Connection::open(addr.clone(), self.network.clone()) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Failed to open connection to {}: {}", addr, e);
                    continue;
                }
            };
            peers.insert(addr.clone(), Peer { connection });
            added.push(addr.clone());
        }
        drop(peers);

        if !added.is_empty() {
            info!("Added {} peer(s): {:?}", added.len(), added);
        }
        added
    }

    /// Replace every `Shutdown` entry with a fresh connection.
    ///
    /// Returns the reopened addresses.
    pub fn reopen_closed(&self) -> Vec<PeerAddress> {
        let mut reopened = Vec::new();
        let mut closed = Vec::new();
        let mut peers = self.peers.write();

        let addrs: Vec<PeerAddress> = peers
            .iter()
            .filter(|(_, peer)| peer.state().is_terminal())
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in addrs {
            let connection = match Connection::open(addr.clone(), self.network.clone()) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Failed to reopen connection to {}: {}", addr, e);
                    continue;
                }
            };
            if let Some(old) = peers.insert(addr.clone(), Peer { connection }) {
                closed.push(old);
            }
            reopened.push(addr);
        }
        drop(peers);
        drop(closed);

        if !reopened.is_empty() {
            debug!("Reopened {} peer(s)", reopened.len());
        }
        reopened
    }

    /// Close the connection to `addr` and forget it. No-op if absent.
    pub fn remove_peer(&self, addr: &PeerAddress) -> bool {
        let removed = self.peers.write().remove(addr);
        match removed {
            Some(peer) => {
                peer.connection.close();
                debug!("Removed peer {}", addr);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the known addresses.
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.peers.read().keys().cloned().collect()
    }

    /// Snapshot of the addresses whose connection has not shut down.
    pub fn active_peers(&self) -> Vec<PeerAddress> {
        self.peers
            .read()
            .iter()
            .filter(|(_, peer)| !peer.state().is_terminal())
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Live connection state of `addr`.
    pub fn peer_state(&self, addr: &PeerAddress) -> Result<ConnectionState> {
        self.peers
            .read()
            .get(addr)
            .map(Peer::state)
            .ok_or_else(|| OverlayError::PeerNotFound(addr.clone()))
    }

    /// Subscribe to the connection state changes of `addr`.
    pub fn watch_peer(
        &self,
        addr: &PeerAddress,
    ) -> Result<tokio::sync::watch::Receiver<ConnectionState>> {
        self.peers
            .read()
            .get(addr)
            .map(|peer| peer.connection.watch())
            .ok_or_else(|| OverlayError::PeerNotFound(addr.clone()))
    }

    /// Wait until the connection to `addr` reaches `target`.
    ///
    /// Returns false if the connection shuts down first (or `target` is
    /// `Shutdown` and it never gets there).
    pub async fn wait_for_state(&self, addr: &PeerAddress, target: ConnectionState) -> Result<bool> {
        let mut changes = self.watch_peer(addr)?;
        let reached = changes
            .wait_for(|state| *state == target || state.is_terminal())
            .await
            .map(|state| *state == target)
            .unwrap_or(false);
        Ok(reached)
    }

    /// Whether `addr` is in the set.
    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.peers.read().contains_key(addr)
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Close every connection, keeping the entries so their `Shutdown` state
    /// stays observable.
    pub fn close_all(&self) {
        for peer in self.peers.read().values() {
            peer.connection.close();
        }
    }

    /// Close every connection and forget all peers.
    pub fn clear(&self) {
        let drained: Vec<Peer> = self.peers.write().drain().map(|(_, peer)| peer).collect();
        for peer in &drained {
            peer.connection.close();
        }
    }
}
