//! Client node
//!
//! [`PeerNode`] owns the session manager, router, transfer engine and room
//! coordinator together with the injected collaborators. Every input
//! (relay event, direct-channel event, user command) enters through
//! [`PeerNode::handle`], one at a time.

use std::collections::HashSet;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::models::{ChatId, User};
use crate::protocol::{IceCandidate, SignalEvent};
use crate::rooms::RoomCoordinator;
use crate::router::{path_for, MessageRouter};
use crate::session::{NegotiationState, OpenOutcome, PeerSessionManager, TransportFactory};
use crate::signaling::SignalingChannel;
use crate::sink::{ChatSink, Notice};
use crate::transfer::FileTransferEngine;

/// Event reported by a peer transport
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Close,
    /// Text read from the data channel
    Message(String),
    /// Candidate gathered locally, to be sent to the peer
    LocalCandidate(IceCandidate),
    Failed(String),
}

/// Action requested by the user
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    /// Announce ourselves to the relay
    Announce {
        name: String,
        previous_id: Option<Uuid>,
    },
    /// Open a 1:1 chat, negotiating a direct session
    OpenChat(Uuid),
    /// Make a joined room the active chat
    OpenRoomChat(Uuid),
    SendChat {
        chat: ChatId,
        text: String,
    },
    SendFile {
        chat: ChatId,
        name: String,
        data: Vec<u8>,
    },
    CreateRoom {
        name: String,
        is_private: bool,
        pin: Option<String>,
    },
    JoinRoom {
        room_id: Uuid,
        pin: Option<String>,
    },
    LeaveRoom(Uuid),
    KickMember {
        room_id: Uuid,
        target_user_id: Uuid,
    },
}

/// Everything a node reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Signal(SignalEvent),
    Channel { peer_id: Uuid, event: ChannelEvent },
    Command(NodeCommand),
}

/// A chat client
pub struct PeerNode<F: TransportFactory, S, K> {
    sessions: PeerSessionManager<F>,
    router: MessageRouter,
    transfers: FileTransferEngine,
    rooms: RoomCoordinator,
    signaling: S,
    sink: K,
    users: Vec<User>,
    active_chat: Option<ChatId>,
}

impl<F, S, K> PeerNode<F, S, K>
where
    F: TransportFactory,
    S: SignalingChannel,
    K: ChatSink,
{
    /// Build a node. `local_id` may be nil until the relay assigns one.
    pub fn new(local_id: Uuid, factory: F, signaling: S, sink: K, config: NodeConfig) -> Self {
        Self {
            sessions: PeerSessionManager::new(local_id, factory, config.max_buffered_candidates),
            router: MessageRouter::new(local_id),
            transfers: FileTransferEngine::new(config),
            rooms: RoomCoordinator::new(local_id),
            signaling,
            sink,
            users: Vec::new(),
            active_chat: None,
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.sessions.local_id()
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.active_chat
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn sessions(&self) -> &PeerSessionManager<F> {
        &self.sessions
    }

    pub fn transfers(&self) -> &FileTransferEngine {
        &self.transfers
    }

    pub fn rooms(&self) -> &RoomCoordinator {
        &self.rooms
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn signaling_mut(&mut self) -> &mut S {
        &mut self.signaling
    }

    /// Single entry point for every inbound event.
    ///
    /// Errors are logged; user-facing ones are also surfaced as
    /// [`Notice::Rejected`].
    pub fn handle(&mut self, event: NodeEvent, now: Instant) {
        let result = match event {
            NodeEvent::Signal(signal) => self.on_signal(signal),
            NodeEvent::Channel { peer_id, event } => {
                self.on_channel(peer_id, event);
                Ok(())
            }
            NodeEvent::Command(command) => self.on_command(command, now),
        };

        if let Err(e) = result {
            if e.is_user_facing() {
                self.sink.notify(Notice::Rejected(e.to_string()));
            }
            warn!(error = %e, "Event handling failed");
        }
    }

    /// Emit every file frame due at `now`
    pub fn pump_transfers(&mut self, now: Instant) {
        self.transfers
            .pump(&mut self.sessions, &mut self.signaling, &mut self.sink, now);
    }

    /// When the next file frame is due
    pub fn next_due(&self) -> Option<Instant> {
        self.transfers.next_due()
    }

    fn on_signal(&mut self, event: SignalEvent) -> Result<()> {
        match event {
            SignalEvent::UserJoined { user_id } => {
                info!(user_id = %user_id, "Registered with relay");
                self.sessions.set_local_id(user_id);
                self.router.set_local_id(user_id);
                self.rooms.set_local_id(user_id);
            }
            SignalEvent::UserList(users) => {
                let present: HashSet<Uuid> = users.iter().map(|u| u.id).collect();
                for peer_id in self.sessions.retain_peers(&present) {
                    if self.active_chat == Some(ChatId::Peer(peer_id)) {
                        self.active_chat = None;
                        self.sink.notify(Notice::ChatClosed {
                            chat: ChatId::Peer(peer_id),
                        });
                    }
                }
                self.users = users;
            }
            SignalEvent::RoomList(rooms) => self.rooms.on_room_list(rooms),
            SignalEvent::RoomCreated(notice) | SignalEvent::RoomJoined(notice) => {
                let room_id = notice.room_id;
                self.rooms.on_snapshot(notice);
                self.active_chat = Some(ChatId::Room(room_id));
            }
            SignalEvent::RoomUpdate(notice) => self.rooms.on_snapshot(notice),
            SignalEvent::RoomLeft(notice) => {
                self.rooms
                    .on_removed(notice, false, &mut self.active_chat, &mut self.sink)
            }
            SignalEvent::RoomKicked(notice) => {
                self.rooms
                    .on_removed(notice, true, &mut self.active_chat, &mut self.sink)
            }
            SignalEvent::RoomMessage { room_id, message } => {
                self.router.on_room_message(room_id, message, &mut self.sink)
            }
            SignalEvent::Offer { route, offer } => {
                let from = sender(route.from_user_id, "signal:offer")?;
                if let Err(e) = self.sessions.on_remote_offer(from, offer, &mut self.signaling) {
                    self.on_negotiation_error(from, e);
                }
            }
            SignalEvent::Answer { route, answer } => {
                let from = sender(route.from_user_id, "signal:answer")?;
                if let Err(e) = self.sessions.on_remote_answer(from, answer) {
                    self.on_negotiation_error(from, e);
                }
            }
            SignalEvent::Ice { route, candidate } => {
                let from = sender(route.from_user_id, "signal:ice")?;
                if let Err(e) = self.sessions.on_remote_candidate(from, candidate) {
                    self.on_negotiation_error(from, e);
                }
            }
            event @ (SignalEvent::MessageSend { .. }
            | SignalEvent::FileStart { .. }
            | SignalEvent::FileChunk { .. }
            | SignalEvent::FileEnd { .. }) => {
                self.router
                    .on_relay_event(event, &mut self.sink, &mut self.transfers)
            }
            SignalEvent::Error { message } => {
                warn!(message = %message, "Relay rejected request");
                self.sink.notify(Notice::Rejected(message));
            }
            other @ (SignalEvent::UserJoin { .. }
            | SignalEvent::RoomCreate { .. }
            | SignalEvent::RoomJoin { .. }
            | SignalEvent::RoomLeave { .. }
            | SignalEvent::RoomKick { .. }) => {
                debug!(event = other.name(), "Client-bound relay event ignored");
            }
        }
        Ok(())
    }

    fn on_channel(&mut self, peer_id: Uuid, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                if self.sessions.on_channel_open(peer_id) {
                    self.sink.notify(Notice::DirectOpen { peer_id });
                }
            }
            ChannelEvent::Close => {
                if self.sessions.on_channel_close(peer_id) {
                    self.sink.notify(Notice::DirectClosed { peer_id });
                }
            }
            ChannelEvent::Message(text) => {
                self.router
                    .on_direct_text(peer_id, &text, &mut self.sink, &mut self.transfers)
            }
            ChannelEvent::LocalCandidate(candidate) => {
                self.sessions
                    .on_local_candidate(peer_id, candidate, &mut self.signaling)
            }
            ChannelEvent::Failed(reason) => {
                if self.sessions.on_transport_failed(peer_id, &reason) {
                    self.sink.notify(Notice::Degraded { peer_id });
                }
            }
        }
    }

    fn on_command(&mut self, command: NodeCommand, now: Instant) -> Result<()> {
        match command {
            NodeCommand::Announce { name, previous_id } => {
                if name.trim().is_empty() {
                    return Err(Error::InvalidOperation("Name must not be empty".into()));
                }
                self.signaling.send(SignalEvent::UserJoin {
                    name: name.trim().to_string(),
                    user_id: previous_id,
                });
            }
            NodeCommand::OpenChat(peer_id) => {
                self.active_chat = Some(ChatId::Peer(peer_id));
                match self.sessions.open(peer_id, &mut self.signaling) {
                    Ok(OpenOutcome::Created) => debug!(peer_id = %peer_id, "Negotiating direct session"),
                    Ok(OpenOutcome::Existing(state)) => {
                        debug!(peer_id = %peer_id, state = ?state, "Reusing session")
                    }
                    Err(e @ Error::InvalidOperation(_)) => {
                        self.active_chat = None;
                        return Err(e);
                    }
                    Err(e) => self.on_negotiation_error(peer_id, e),
                }
            }
            NodeCommand::OpenRoomChat(room_id) => {
                if !self.rooms.is_member(room_id) {
                    return Err(Error::RoomAuthorization("Join the room first".into()));
                }
                self.active_chat = Some(ChatId::Room(room_id));
            }
            NodeCommand::SendChat { chat, text } => {
                if let ChatId::Room(room_id) = chat {
                    if !self.rooms.is_member(room_id) {
                        return Err(Error::RoomAuthorization("Not a member of this room".into()));
                    }
                }
                self.router.send_chat(
                    &mut self.sessions,
                    &mut self.signaling,
                    &mut self.sink,
                    chat,
                    &text,
                )?;
            }
            NodeCommand::SendFile { chat, name, data } => {
                let path = path_for(&self.sessions, chat.id());
                self.transfers.start_send(
                    &mut self.sessions,
                    &mut self.signaling,
                    chat,
                    &name,
                    data,
                    path,
                    now,
                )?;
            }
            NodeCommand::CreateRoom {
                name,
                is_private,
                pin,
            } => self
                .rooms
                .create(&mut self.signaling, &name, is_private, pin.as_deref())?,
            NodeCommand::JoinRoom { room_id, pin } => {
                self.rooms
                    .join(&mut self.signaling, room_id, pin.as_deref())?
            }
            NodeCommand::LeaveRoom(room_id) => self.rooms.leave(&mut self.signaling, room_id)?,
            NodeCommand::KickMember {
                room_id,
                target_user_id,
            } => self
                .rooms
                .kick(&mut self.signaling, room_id, target_user_id)?,
        }
        Ok(())
    }

    fn on_negotiation_error(&mut self, peer_id: Uuid, error: Error) {
        match error {
            Error::ProtocolConflict { .. } => {
                debug!(peer_id = %peer_id, error = %error, "Negotiation message ignored")
            }
            _ => {
                warn!(peer_id = %peer_id, error = %error, "Direct session unavailable, using relay");
                if self.sessions.state(peer_id) == NegotiationState::Failed {
                    self.sink.notify(Notice::Degraded { peer_id });
                }
            }
        }
    }
}

fn sender(from: Option<Uuid>, event: &str) -> Result<Uuid> {
    from.ok_or_else(|| Error::MalformedPayload(format!("{} without fromUserId", event)))
}
