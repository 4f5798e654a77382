//! Error types for Peerlink Core

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    /// Offer/answer/candidate could not be applied to the transport
    #[error("Negotiation with {peer_id} failed: {reason}")]
    Negotiation { peer_id: Uuid, reason: String },

    /// Inbound negotiation message that does not fit the local session state
    #[error("Protocol conflict with {peer_id}: {reason}")]
    ProtocolConflict { peer_id: Uuid, reason: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Wrong pin, not a member, or not the leader
    #[error("Not authorized: {0}")]
    RoomAuthorization(String),

    #[error("Transfer {id} incomplete: {received}/{total} chunks")]
    TransferIncomplete { id: Uuid, received: u32, total: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Direct channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error should be shown to the user rather than only logged
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::RoomAuthorization(_) | Error::InvalidOperation(_) | Error::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
