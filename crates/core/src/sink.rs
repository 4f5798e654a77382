//! Collaborator interface for everything the core does not own:
//! rendering, history persistence, saving received files, notifications.

use uuid::Uuid;

use crate::models::{ChatId, ChatMessage};

/// A fully reassembled inbound file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub id: Uuid,
    pub from: Uuid,
    pub name: String,
    pub data: Vec<u8>,
}

/// User-visible notices raised by the core
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Request rejected locally or by the relay
    Rejected(String),
    /// Direct session failed; traffic to this peer goes through the relay
    Degraded { peer_id: Uuid },
    /// Direct channel with a peer opened
    DirectOpen { peer_id: Uuid },
    /// Direct channel with a peer closed
    DirectClosed { peer_id: Uuid },
    /// `file-end` arrived before every chunk; progress stays indefinite
    TransferStalled { id: Uuid, received: u32, total: u32 },
    /// The open chat view was bound to a room the user no longer belongs to
    ChatClosed { chat: ChatId },
    /// Removed from a room by its leader
    Kicked { room_id: Uuid },
}

/// Receives display, persistence and notification callbacks
pub trait ChatSink {
    /// Render a message in the conversation `chat`
    fn display(&mut self, chat: ChatId, message: &ChatMessage, outgoing: bool);

    /// Store a message in local history
    fn persist(&mut self, chat: ChatId, message: &ChatMessage);

    /// Hand a reassembled file to storage / auto-download
    fn file_received(&mut self, file: ReceivedFile);

    /// Transfer progress in percent
    fn transfer_progress(&mut self, _id: Uuid, _percent: f32) {}

    fn notify(&mut self, notice: Notice);
}
