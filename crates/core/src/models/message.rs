//! Chat message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ChatId {
    /// 1:1 chat with a remote user
    Peer(Uuid),
    /// Group chat in a room
    Room(Uuid),
}

impl ChatId {
    pub fn id(&self) -> Uuid {
        match self {
            ChatId::Peer(id) | ChatId::Room(id) => *id,
        }
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatId::Peer(id) => write!(f, "peer:{}", id),
            ChatId::Room(id) => write!(f, "room:{}", id),
        }
    }
}

/// A chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: Uuid,
    pub chat_id: ChatId,
}

impl ChatMessage {
    pub fn new(chat_id: ChatId, sender_id: Uuid, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            timestamp: Utc::now(),
            sender_id,
            chat_id,
        }
    }
}
