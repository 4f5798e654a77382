//! Peerlink Network Library
//!
//! TCP transport for the relay: the server run by `peerlink-relay` and the
//! client used by chat nodes.
//!
//! # Architecture
//!
//! - **Server**: Tracks connected users and rooms, forwards addressed events
//! - **Client**: Announces a user, then exchanges events with the relay
//! - **Framing**: Length-prefixed JSON signal events
//!
//! # Usage
//!
//! ```ignore
//! // Relay
//! let server = Server::start("0.0.0.0:3000".parse()?, 256).await?;
//!
//! // Node
//! let mut client = Client::connect(addr, "ada", None).await?;
//! let node = PeerNode::new(client.user_id(), RelayOnly, client.outbox(), sink, NodeConfig::default());
//! let (node_tx, node_rx) = mpsc::unbounded_channel();
//! tokio::spawn(NodeRuntime::new(node, node_rx).run());
//! client.forward_to(node_tx).await;
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod server;

pub use client::{Client, ConnectionState};
pub use error::{Error, Result};
pub use frame::MAX_FRAME_SIZE;
pub use server::Server;

/// Default relay port
pub const DEFAULT_PORT: u16 = 3000;
