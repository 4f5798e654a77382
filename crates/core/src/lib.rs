//! Peerlink Core Library
//!
//! Peer sessions, dual-path message and file delivery, and room
//! membership for the Peerlink chat platform.

pub mod config;
pub mod error;
pub mod invariants;
pub mod models;
pub mod node;
pub mod protocol;
pub mod rooms;
pub mod router;
pub mod runtime;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use config::{NodeConfig, CHUNK_SIZE};
pub use error::{Error, Result};
pub use models::*;
pub use node::{ChannelEvent, NodeCommand, NodeEvent, PeerNode};
pub use protocol::*;
pub use rooms::{RoomChange, RoomCoordinator, RoomRegistry};
pub use router::{DeliveryPath, MessageRouter};
pub use runtime::NodeRuntime;
pub use session::{
    ChannelState, NegotiationState, OfferOutcome, OpenOutcome, PeerSession, PeerSessionManager,
    PeerTransport, RelayOnly, SessionRole, TransportFactory,
};
pub use signaling::SignalingChannel;
pub use sink::{ChatSink, Notice, ReceivedFile};
pub use transfer::{FileTransferEngine, TransferDirection};
