//! # Meshwork P2P
//!
//! **Unstructured peer-to-peer overlay**
//!
//! Nodes identified by `host:port` find each other transitively from a single
//! seed and flood messages across the resulting mesh, delivering each message
//! exactly once per node.
//!
//! ## Features
//!
//! - **Peer Set**: Known peers with live connection state
//! - **Discovery**: Periodic neighbor queries, converging from one seed
//! - **Broadcast**: Flooding with a deduplication cache that breaks cycles
//! - **Server**: Answers neighbor queries and accepts broadcasts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshwork_p2p::{Node, Payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::new("127.0.0.1:7001".parse()?)?;
//!     node.start_server().await?;
//!     node.start_discover_peers(&"127.0.0.1:7000".parse()?).await?;
//!
//!     let mut deliveries = node.subscribe();
//!     node.publish(node.next_envelope(Payload::text("Hello"))).await?;
//!
//!     let envelope = deliveries.recv().await?;
//!     println!("Delivered: {:?}", envelope.payload.as_text());
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod behavior;
mod broadcast;
pub mod cache;
pub mod config;
pub mod connection;
mod discovery;
pub mod error;
mod event_loop;
pub mod network;
pub mod node;
pub mod peer;
pub mod protocol;
mod server;

// Re-export main types
pub use address::PeerAddress;
pub use cache::DedupCache;
pub use config::NodeConfig;
pub use connection::ConnectionState;
pub use error::{OverlayError, Result, Service};
pub use node::Node;
pub use peer::PeerSet;
pub use protocol::{Envelope, MessageId, Payload, Rpc, RpcResponse};
