//! The overlay node: one address, one peer set, and the services running on
//! top of them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::PeerAddress;
use crate::broadcast as flood;
use crate::cache::DedupCache;
use crate::config::NodeConfig;
use crate::discovery::{self, Discovery};
use crate::error::{OverlayError, Result, Service};
use crate::network::Network;
use crate::peer::PeerSet;
use crate::protocol::{Envelope, MessageId, Payload};
use crate::server::Server;

/// State shared by the node handle and its background tasks.
pub(crate) struct NodeContext {
    pub(crate) local: PeerAddress,
    pub(crate) config: NodeConfig,
    pub(crate) peers: PeerSet,
    pub(crate) cache: DedupCache,
    pub(crate) network: Network,
    pub(crate) deliveries: broadcast::Sender<Envelope>,
    pub(crate) delivered: AtomicUsize,
}

struct NodeInner {
    ctx: Arc<NodeContext>,
    shutdown: CancellationToken,
    server: Mutex<Option<Server>>,
    discovery: Mutex<Option<Discovery>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    sequence: AtomicU64,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A participant in the overlay.
///
/// Cloning is cheap; all clones share the same peer set and services. The
/// node's background tasks stop when [`Node::shutdown`] is called or the last
/// clone is dropped.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node bound (logically) to `address` with default settings.
    ///
    /// Nothing listens until [`Node::start_server`]. Must be called inside a
    /// tokio runtime.
    pub fn new(address: PeerAddress) -> Result<Self> {
        Self::with_config(address, NodeConfig::default())
    }

    /// Create a node with explicit settings.
    pub fn with_config(address: PeerAddress, config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (network, event_loop) = Network::spawn(&address, &config, shutdown.child_token())?;
        let (deliveries, _) = broadcast::channel(config.delivery_buffer);

        let ctx = Arc::new(NodeContext {
            local: address.clone(),
            peers: PeerSet::new(address, network.clone()),
            cache: DedupCache::from_capacity(config.dedup_capacity),
            network,
            deliveries,
            delivered: AtomicUsize::new(0),
            config,
        });

        Ok(Self {
            inner: Arc::new(NodeInner {
                ctx,
                shutdown,
                server: Mutex::new(None),
                discovery: Mutex::new(None),
                event_loop: Mutex::new(Some(event_loop)),
                sequence: AtomicU64::new(0),
            }),
        })
    }

    pub(crate) fn context(&self) -> &NodeContext {
        &self.inner.ctx
    }

    /// This node's address.
    pub fn address(&self) -> &PeerAddress {
        &self.inner.ctx.local
    }

    /// Settings the node was created with.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.ctx.config
    }

    /// The node's peer set.
    pub fn peer_set(&self) -> &PeerSet {
        &self.inner.ctx.peers
    }

    /// Bind the node's address and start answering RPCs.
    ///
    /// Fails with [`OverlayError::AlreadyRunning`] if the server is up, or
    /// with the bind error if the address cannot be bound.
    pub async fn start_server(&self) -> Result<()> {
        let mut server = self.inner.server.lock().await;
        if server.is_some() {
            return Err(OverlayError::AlreadyRunning(Service::Server));
        }
        *server = Some(Server::start(self.inner.ctx.clone(), &self.inner.shutdown).await?);
        Ok(())
    }

    /// Stop accepting connections. In-flight handlers are cancelled and
    /// awaited before this returns.
    pub async fn stop_server(&self) -> Result<()> {
        let server = self
            .inner
            .server
            .lock()
            .await
            .take()
            .ok_or(OverlayError::NotRunning(Service::Server))?;
        server.stop(&self.inner.ctx).await
    }

    /// Whether the server is running.
    pub async fn is_serving(&self) -> bool {
        self.inner.server.lock().await.is_some()
    }

    /// Add `seed` to the peer set and start periodic discovery.
    pub async fn start_discover_peers(&self, seed: &PeerAddress) -> Result<()> {
        self.start_discover_peers_from(std::slice::from_ref(seed)).await
    }

    /// Start periodic discovery from several seeds.
    ///
    /// Peers closed by an earlier [`Node::stop_discover_peers`] are reopened.
    pub async fn start_discover_peers_from(&self, seeds: &[PeerAddress]) -> Result<()> {
        let mut discovery = self.inner.discovery.lock().await;
        if discovery.is_some() {
            return Err(OverlayError::AlreadyRunning(Service::Discovery));
        }

        self.inner.ctx.peers.reopen_closed();
        self.inner.ctx.peers.add_peers(seeds);
        *discovery = Some(Discovery::start(self.inner.ctx.clone(), &self.inner.shutdown));
        Ok(())
    }

    /// Stop discovery and close every peer connection.
    ///
    /// Peers stay in the set with state `Shutdown`. No discovery query starts
    /// after this returns.
    pub async fn stop_discover_peers(&self) -> Result<()> {
        let discovery = self
            .inner
            .discovery
            .lock()
            .await
            .take()
            .ok_or(OverlayError::NotRunning(Service::Discovery))?;
        discovery.stop().await;
        self.inner.ctx.peers.close_all();
        Ok(())
    }

    /// Whether discovery is running.
    pub async fn is_discovering(&self) -> bool {
        self.inner.discovery.lock().await.is_some()
    }

    /// Ask `target` for its neighbor list. Never contains this node's address.
    pub async fn request_neighbors(&self, target: &PeerAddress) -> Result<Vec<PeerAddress>> {
        discovery::request_neighbors(&self.inner.ctx, target).await
    }

    /// Hand `envelope` to `via`, which delivers and floods it.
    ///
    /// Succeeds once `via` acknowledges; a duplicate acknowledgment is still
    /// a success.
    pub async fn request_broadcast(&self, via: &PeerAddress, envelope: Envelope) -> Result<()> {
        let duplicate = flood::request_broadcast(&self.inner.ctx, via, envelope).await?;
        if duplicate {
            debug!("{} had already seen the message", via);
        }
        Ok(())
    }

    /// Originate `envelope` here: deliver it locally and flood it to every
    /// active peer.
    ///
    /// Returns how many peers acknowledged, or zero if this node had already
    /// seen the message.
    pub async fn publish(&self, envelope: Envelope) -> Result<usize> {
        let ctx = &self.inner.ctx;
        match flood::accept(ctx, None, &envelope) {
            Some(targets) => Ok(flood::relay(ctx, &envelope, targets).await),
            None => Ok(0),
        }
    }

    /// Build an envelope originating here, with the next sequence number.
    pub fn next_envelope(&self, payload: Payload) -> Envelope {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Envelope::sequenced(self.inner.ctx.local.clone(), sequence, payload)
    }

    /// Subscribe to messages delivered at this node, in delivery order.
    ///
    /// Only messages delivered after subscribing are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.ctx.deliveries.subscribe()
    }

    /// Number of distinct messages delivered at this node.
    pub fn received_count(&self) -> usize {
        self.inner.ctx.delivered.load(Ordering::SeqCst)
    }

    /// Whether a message with identity `id` has been processed here.
    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.inner.ctx.cache.contains(id)
    }

    /// Stop every service, close all connections, and stop the network.
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop_discover_peers().await {
            debug!("Discovery not stopped: {}", e);
        }
        if let Err(e) = self.stop_server().await {
            debug!("Server not stopped: {}", e);
        }
        self.inner.ctx.peers.close_all();
        self.inner.shutdown.cancel();

        if let Some(handle) = self.inner.event_loop.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Network event loop ended abnormally: {}", e);
            }
        }
        info!("Node {} shut down", self.inner.ctx.local);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.inner.ctx.local)
            .field("peers", &self.inner.ctx.peers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;

    fn addr(s: &str) -> PeerAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_server_lifecycle_errors() {
        let node = Node::new(addr("127.0.0.1:19401")).unwrap();

        assert!(matches!(
            node.stop_server().await,
            Err(OverlayError::NotRunning(Service::Server))
        ));

        node.start_server().await.unwrap();
        assert!(node.is_serving().await);
        assert!(matches!(
            node.start_server().await,
            Err(OverlayError::AlreadyRunning(Service::Server))
        ));

        node.stop_server().await.unwrap();
        assert!(!node.is_serving().await);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_discovery_lifecycle_errors() {
        let node = Node::new(addr("127.0.0.1:19411")).unwrap();
        let seed = addr("127.0.0.1:19412");

        assert!(matches!(
            node.stop_discover_peers().await,
            Err(OverlayError::NotRunning(Service::Discovery))
        ));

        node.start_discover_peers(&seed).await.unwrap();
        assert!(node.peer_set().contains(&seed));
        assert!(matches!(
            node.start_discover_peers(&seed).await,
            Err(OverlayError::AlreadyRunning(Service::Discovery))
        ));

        node.stop_discover_peers().await.unwrap();
        assert!(!node.is_discovering().await);
        assert_eq!(node.peer_set().peer_state(&seed).unwrap(), ConnectionState::Shutdown);

        // Restarting reopens the peers the previous stop closed.
        node.start_discover_peers(&seed).await.unwrap();
        assert_ne!(node.peer_set().peer_state(&seed).unwrap(), ConnectionState::Shutdown);
        assert_eq!(node.peer_set().len(), 1);

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_next_envelope_is_sequenced() {
        let node = Node::new(addr("127.0.0.1:19421")).unwrap();

        let first = node.next_envelope(Payload::text("same"));
        let second = node.next_envelope(Payload::text("same"));

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.origin.as_ref(), Some(node.address()));
        assert_ne!(first.id(), second.id());

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_delivers_locally_once() {
        let node = Node::new(addr("127.0.0.1:19431")).unwrap();
        let envelope = Envelope::new(Payload::text("local"));

        assert_eq!(node.publish(envelope.clone()).await.unwrap(), 0);
        assert_eq!(node.publish(envelope.clone()).await.unwrap(), 0);

        assert_eq!(node.received_count(), 1);
        assert!(node.has_seen(&envelope.id()));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = NodeConfig {
            delivery_buffer: 0,
            ..NodeConfig::default()
        };
        assert!(Node::with_config(addr("127.0.0.1:19441"), config).is_err());
    }
}
