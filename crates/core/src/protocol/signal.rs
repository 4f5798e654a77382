//! Relay signaling events

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::{DirectPayload, FileChunk, FileEnd, FileStart};
use crate::models::{ChatMessage, RoomSnapshot, User};

/// Kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque session description produced by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Addressing for relayed events.
///
/// Clients fill `target_user_id`; the relay replaces it with
/// `from_user_id` when forwarding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<Uuid>,
}

impl Route {
    pub fn to(target: Uuid) -> Self {
        Self {
            target_user_id: Some(target),
            from_user_id: None,
        }
    }

    pub fn from(sender: Uuid) -> Self {
        Self {
            target_user_id: None,
            from_user_id: Some(sender),
        }
    }
}

/// Room id plus the fresh snapshot, when the room still exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomNotice {
    pub room_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomSnapshot>,
}

/// Events exchanged with the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all_fields = "camelCase")]
pub enum SignalEvent {
    /// Announce a display name, optionally proposing a previous id
    #[serde(rename = "user:join")]
    UserJoin {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
    },

    /// Relay assigned the user id
    #[serde(rename = "user:joined")]
    UserJoined { user_id: Uuid },

    #[serde(rename = "user:list")]
    UserList(Vec<User>),

    #[serde(rename = "room:list")]
    RoomList(Vec<RoomSnapshot>),

    #[serde(rename = "room:create")]
    RoomCreate {
        name: String,
        is_private: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },

    #[serde(rename = "room:created")]
    RoomCreated(RoomNotice),

    #[serde(rename = "room:joined")]
    RoomJoined(RoomNotice),

    #[serde(rename = "room:left")]
    RoomLeft(RoomNotice),

    /// Sent to a member removed by the leader
    #[serde(rename = "room:kicked")]
    RoomKicked(RoomNotice),

    /// Membership snapshot broadcast to current members
    #[serde(rename = "room:update")]
    RoomUpdate(RoomNotice),

    #[serde(rename = "room:join")]
    RoomJoin {
        room_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },

    #[serde(rename = "room:leave")]
    RoomLeave { room_id: Uuid },

    #[serde(rename = "room:kick")]
    RoomKick { room_id: Uuid, target_user_id: Uuid },

    #[serde(rename = "room:message")]
    RoomMessage { room_id: Uuid, message: ChatMessage },

    #[serde(rename = "signal:offer")]
    Offer {
        #[serde(flatten)]
        route: Route,
        offer: SessionDescription,
    },

    #[serde(rename = "signal:answer")]
    Answer {
        #[serde(flatten)]
        route: Route,
        answer: SessionDescription,
    },

    #[serde(rename = "signal:ice")]
    Ice {
        #[serde(flatten)]
        route: Route,
        candidate: IceCandidate,
    },

    /// Relay-path chat message
    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(flatten)]
        route: Route,
        message: ChatMessage,
    },

    #[serde(rename = "file:start")]
    FileStart {
        #[serde(flatten)]
        route: Route,
        #[serde(flatten)]
        meta: FileStart,
    },

    #[serde(rename = "file:chunk")]
    FileChunk {
        #[serde(flatten)]
        route: Route,
        #[serde(flatten)]
        chunk: FileChunk,
    },

    #[serde(rename = "file:end")]
    FileEnd {
        #[serde(flatten)]
        route: Route,
        #[serde(flatten)]
        end: FileEnd,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl SignalEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            SignalEvent::UserJoin { .. } => "user:join",
            SignalEvent::UserJoined { .. } => "user:joined",
            SignalEvent::UserList(_) => "user:list",
            SignalEvent::RoomList(_) => "room:list",
            SignalEvent::RoomCreate { .. } => "room:create",
            SignalEvent::RoomCreated(_) => "room:created",
            SignalEvent::RoomJoined(_) => "room:joined",
            SignalEvent::RoomLeft(_) => "room:left",
            SignalEvent::RoomKicked(_) => "room:kicked",
            SignalEvent::RoomUpdate(_) => "room:update",
            SignalEvent::RoomJoin { .. } => "room:join",
            SignalEvent::RoomLeave { .. } => "room:leave",
            SignalEvent::RoomKick { .. } => "room:kick",
            SignalEvent::RoomMessage { .. } => "room:message",
            SignalEvent::Offer { .. } => "signal:offer",
            SignalEvent::Answer { .. } => "signal:answer",
            SignalEvent::Ice { .. } => "signal:ice",
            SignalEvent::MessageSend { .. } => "message:send",
            SignalEvent::FileStart { .. } => "file:start",
            SignalEvent::FileChunk { .. } => "file:chunk",
            SignalEvent::FileEnd { .. } => "file:end",
            SignalEvent::Error { .. } => "error",
        }
    }

    /// Routing header of addressed events
    pub fn route(&self) -> Option<&Route> {
        match self {
            SignalEvent::Offer { route, .. }
            | SignalEvent::Answer { route, .. }
            | SignalEvent::Ice { route, .. }
            | SignalEvent::MessageSend { route, .. }
            | SignalEvent::FileStart { route, .. }
            | SignalEvent::FileChunk { route, .. }
            | SignalEvent::FileEnd { route, .. } => Some(route),
            _ => None,
        }
    }

    fn route_mut(&mut self) -> Option<&mut Route> {
        match self {
            SignalEvent::Offer { route, .. }
            | SignalEvent::Answer { route, .. }
            | SignalEvent::Ice { route, .. }
            | SignalEvent::MessageSend { route, .. }
            | SignalEvent::FileStart { route, .. }
            | SignalEvent::FileChunk { route, .. }
            | SignalEvent::FileEnd { route, .. } => Some(route),
            _ => None,
        }
    }

    /// Rewrite an addressed event for delivery.
    ///
    /// Returns the target and the event stamped with `from`, or `None` for
    /// events that carry no target.
    pub fn into_forwarded(mut self, from: Uuid) -> Option<(Uuid, SignalEvent)> {
        let route = self.route_mut()?;
        let target = route.target_user_id?;
        *route = Route::from(from);
        Some((target, self))
    }

    /// Sender of a forwarded event
    pub fn sender(&self) -> Option<Uuid> {
        self.route().and_then(|r| r.from_user_id)
    }

    /// Map inbound relay chat/file events onto direct-channel payloads
    pub fn into_direct_payload(self) -> Option<(Uuid, DirectPayload)> {
        let from = self.sender()?;
        let payload = match self {
            SignalEvent::MessageSend { message, .. } => DirectPayload::Message(message),
            SignalEvent::FileStart { meta, .. } => DirectPayload::FileStart(meta),
            SignalEvent::FileChunk { chunk, .. } => DirectPayload::FileChunk(chunk),
            SignalEvent::FileEnd { end, .. } => DirectPayload::FileEnd(end),
            _ => return None,
        };
        Some((from, payload))
    }
}

impl DirectPayload {
    /// Relay counterpart of this payload, addressed to `target`
    pub fn into_relay(self, target: Uuid) -> SignalEvent {
        let route = Route::to(target);
        match self {
            DirectPayload::Message(message) => SignalEvent::MessageSend { route, message },
            DirectPayload::FileStart(meta) => SignalEvent::FileStart { route, meta },
            DirectPayload::FileChunk(chunk) => SignalEvent::FileChunk { route, chunk },
            DirectPayload::FileEnd(end) => SignalEvent::FileEnd { route, end },
        }
    }
}
