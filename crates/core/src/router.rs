//! Message routing
//!
//! Picks the delivery path for outgoing traffic and dispatches inbound
//! payloads by tag. Relay events are mapped onto the same
//! [`DirectPayload`] tags before dispatch, so both paths share one handler.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChatId, ChatMessage};
use crate::protocol::{DirectPayload, SignalEvent};
use crate::session::{PeerSessionManager, TransportFactory};
use crate::signaling::SignalingChannel;
use crate::sink::ChatSink;
use crate::transfer::FileTransferEngine;

/// How a frame reaches the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// Open data channel of a connected session
    Direct,
    /// Addressed relay event
    Relay,
}

/// Current path to `peer_id`: direct only while the session is connected
pub fn path_for<F: TransportFactory>(sessions: &PeerSessionManager<F>, peer_id: Uuid) -> DeliveryPath {
    if sessions.is_connected(peer_id) {
        DeliveryPath::Direct
    } else {
        DeliveryPath::Relay
    }
}

/// Write one payload on the given path.
///
/// A failed direct write is returned as an error and never retried on
/// the relay.
pub fn deliver<F: TransportFactory>(
    sessions: &mut PeerSessionManager<F>,
    signaling: &mut impl SignalingChannel,
    path: DeliveryPath,
    peer_id: Uuid,
    payload: DirectPayload,
) -> Result<()> {
    match path {
        DeliveryPath::Direct => {
            let text = payload.encode()?;
            sessions.send(peer_id, &text)
        }
        DeliveryPath::Relay => {
            signaling.send(payload.into_relay(peer_id));
            Ok(())
        }
    }
}

/// Routes chat traffic between the user, the sessions and the relay
#[derive(Debug)]
pub struct MessageRouter {
    local_id: Uuid,
}

impl MessageRouter {
    pub fn new(local_id: Uuid) -> Self {
        Self { local_id }
    }

    pub fn set_local_id(&mut self, local_id: Uuid) {
        self.local_id = local_id;
    }

    /// Send a chat message.
    ///
    /// The message is echoed and persisted locally before dispatch. Peer
    /// chats use the direct channel when connected and `message:send`
    /// otherwise; room chats always go through the relay.
    pub fn send_chat<F: TransportFactory>(
        &self,
        sessions: &mut PeerSessionManager<F>,
        signaling: &mut impl SignalingChannel,
        sink: &mut impl ChatSink,
        chat: ChatId,
        text: &str,
    ) -> Result<ChatMessage> {
        if text.trim().is_empty() {
            return Err(Error::InvalidOperation("Message must not be empty".into()));
        }
        if chat == ChatId::Peer(self.local_id) {
            return Err(Error::InvalidOperation("Cannot message yourself".into()));
        }

        let message = ChatMessage::new(chat, self.local_id, text.to_string());

        sink.display(chat, &message, true);
        sink.persist(chat, &message);

        match chat {
            ChatId::Peer(peer_id) => {
                let path = path_for(sessions, peer_id);
                debug!(peer_id = %peer_id, path = ?path, message_id = %message.id, "Sending chat message");
                deliver(
                    sessions,
                    signaling,
                    path,
                    peer_id,
                    DirectPayload::Message(message.clone()),
                )?;
            }
            ChatId::Room(room_id) => {
                debug!(room_id = %room_id, message_id = %message.id, "Sending room message");
                signaling.send(SignalEvent::RoomMessage {
                    room_id,
                    message: message.clone(),
                });
            }
        }

        Ok(message)
    }

    /// Handle text read from a direct channel
    pub fn on_direct_text(
        &self,
        from: Uuid,
        text: &str,
        sink: &mut impl ChatSink,
        transfers: &mut FileTransferEngine,
    ) {
        match DirectPayload::decode(text) {
            Ok(payload) => self.dispatch(from, payload, sink, transfers),
            Err(e) => warn!(peer_id = %from, error = %e, "Dropping direct payload"),
        }
    }

    /// Handle a relay-path chat or file event
    pub fn on_relay_event(
        &self,
        event: SignalEvent,
        sink: &mut impl ChatSink,
        transfers: &mut FileTransferEngine,
    ) {
        let name = event.name();
        match event.into_direct_payload() {
            Some((from, payload)) => self.dispatch(from, payload, sink, transfers),
            None => warn!(event = name, "Relay event without sender dropped"),
        }
    }

    /// Dispatch an inbound payload by tag
    pub fn dispatch(
        &self,
        from: Uuid,
        payload: DirectPayload,
        sink: &mut impl ChatSink,
        transfers: &mut FileTransferEngine,
    ) {
        let result = match payload {
            DirectPayload::Message(message) => {
                if message.sender_id != from {
                    debug!(peer_id = %from, sender_id = %message.sender_id, "Sender id differs from channel peer");
                }
                let chat = ChatId::Peer(from);
                sink.display(chat, &message, false);
                sink.persist(chat, &message);
                Ok(())
            }
            DirectPayload::FileStart(meta) => transfers.on_start(from, meta),
            DirectPayload::FileChunk(chunk) => transfers.on_chunk(from, chunk, sink),
            DirectPayload::FileEnd(end) => transfers.on_end(from, end, sink),
        };

        if let Err(e) = result {
            warn!(peer_id = %from, error = %e, "Inbound payload rejected");
        }
    }

    /// Handle a `room:message` forwarded by the relay
    pub fn on_room_message(&self, room_id: Uuid, message: ChatMessage, sink: &mut impl ChatSink) {
        // Own messages were already echoed on send
        if message.sender_id == self.local_id {
            return;
        }
        let chat = ChatId::Room(room_id);
        sink.display(chat, &message, false);
        sink.persist(chat, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::protocol::{FileChunk, FileEnd, FileStart, Route, SessionDescription};
    use crate::test_support::{MockFactory, RecordingSink};

    struct Fixture {
        local: Uuid,
        peer: Uuid,
        router: MessageRouter,
        sessions: PeerSessionManager<MockFactory>,
        factory: MockFactory,
        transfers: FileTransferEngine,
        sink: RecordingSink,
        relay: Vec<SignalEvent>,
    }

    fn fixture() -> Fixture {
        let local = Uuid::new_v4();
        let factory = MockFactory::default();
        Fixture {
            local,
            peer: Uuid::new_v4(),
            router: MessageRouter::new(local),
            sessions: PeerSessionManager::new(local, factory.clone(), 8),
            factory,
            transfers: FileTransferEngine::new(NodeConfig::default()),
            sink: RecordingSink::default(),
            relay: Vec::new(),
        }
    }

    fn connect(f: &mut Fixture) {
        f.sessions
            .on_remote_offer(f.peer, SessionDescription::offer("o"), &mut f.relay)
            .unwrap();
        f.sessions.on_channel_open(f.peer);
        f.relay.clear();
    }

    #[test]
    fn test_connected_chat_goes_direct_only() {
        let mut f = fixture();
        connect(&mut f);

        let msg = f
            .router
            .send_chat(&mut f.sessions, &mut f.relay, &mut f.sink, ChatId::Peer(f.peer), "hi")
            .unwrap();

        assert!(f.relay.is_empty());
        let sent = f.factory.sent(f.peer);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            DirectPayload::decode(&sent[0]).unwrap(),
            DirectPayload::Message(msg.clone())
        );
        assert_eq!(f.sink.displayed, vec![(ChatId::Peer(f.peer), msg, true)]);
        assert_eq!(f.sink.persisted.len(), 1);
    }

    #[test]
    fn test_unconnected_chat_goes_through_relay() {
        let mut f = fixture();

        f.router
            .send_chat(&mut f.sessions, &mut f.relay, &mut f.sink, ChatId::Peer(f.peer), "hi")
            .unwrap();

        assert_eq!(f.relay.len(), 1);
        match &f.relay[0] {
            SignalEvent::MessageSend { route, message } => {
                assert_eq!(route.target_user_id, Some(f.peer));
                assert_eq!(message.text, "hi");
                assert_eq!(message.sender_id, f.local);
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_room_chat_always_uses_relay() {
        let mut f = fixture();
        connect(&mut f);
        let room_id = Uuid::new_v4();

        f.router
            .send_chat(&mut f.sessions, &mut f.relay, &mut f.sink, ChatId::Room(room_id), "all")
            .unwrap();

        assert!(f.factory.sent(f.peer).is_empty());
        assert!(matches!(
            &f.relay[0],
            SignalEvent::RoomMessage { room_id: r, .. } if *r == room_id
        ));
    }

    #[test]
    fn test_direct_write_failure_is_not_relayed() {
        let mut f = fixture();
        connect(&mut f);
        f.factory.behavior().fail_send = true;

        let result = f.router.send_chat(
            &mut f.sessions,
            &mut f.relay,
            &mut f.sink,
            ChatId::Peer(f.peer),
            "lost",
        );

        assert!(result.is_err());
        assert!(f.relay.is_empty());
        // Local echo already happened
        assert_eq!(f.sink.displayed.len(), 1);
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut f = fixture();
        let result = f.router.send_chat(
            &mut f.sessions,
            &mut f.relay,
            &mut f.sink,
            ChatId::Peer(f.peer),
            "   ",
        );
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert!(f.sink.displayed.is_empty());
    }

    #[test]
    fn test_inbound_direct_message_is_displayed() {
        let mut f = fixture();
        let msg = ChatMessage::new(ChatId::Peer(f.local), f.peer, "yo".into());
        let text = DirectPayload::Message(msg.clone()).encode().unwrap();

        f.router
            .on_direct_text(f.peer, &text, &mut f.sink, &mut f.transfers);

        assert_eq!(f.sink.displayed, vec![(ChatId::Peer(f.peer), msg.clone(), false)]);
        assert_eq!(f.sink.persisted, vec![(ChatId::Peer(f.peer), msg)]);
    }

    #[test]
    fn test_malformed_direct_text_is_dropped() {
        let mut f = fixture();
        f.router
            .on_direct_text(f.peer, r#"{"type":"typing","data":{}}"#, &mut f.sink, &mut f.transfers);
        f.router
            .on_direct_text(f.peer, "garbage", &mut f.sink, &mut f.transfers);
        f.router
            .on_direct_text(f.peer, r#"{"type":"message","data":{}}"#, &mut f.sink, &mut f.transfers);

        assert!(f.sink.displayed.is_empty());
        assert!(f.sink.files.is_empty());
    }

    #[test]
    fn test_relay_file_events_reach_the_engine() {
        let mut f = fixture();
        let id = Uuid::new_v4();
        let route = Route::from(f.peer);

        let events = vec![
            SignalEvent::FileStart {
                route,
                meta: FileStart {
                    id,
                    name: "a.bin".into(),
                    size: 3,
                    total_chunks: 1,
                },
            },
            SignalEvent::FileChunk {
                route,
                chunk: FileChunk::new(id, 0, b"abc"),
            },
            SignalEvent::FileEnd {
                route,
                end: FileEnd { id },
            },
        ];
        for event in events {
            f.router.on_relay_event(event, &mut f.sink, &mut f.transfers);
        }

        assert_eq!(f.sink.files.len(), 1);
        assert_eq!(f.sink.files[0].data, b"abc");
        assert_eq!(f.sink.files[0].from, f.peer);
    }

    #[test]
    fn test_own_room_message_not_displayed_twice() {
        let mut f = fixture();
        let room_id = Uuid::new_v4();
        let own = ChatMessage::new(ChatId::Room(room_id), f.local, "me".into());
        let other = ChatMessage::new(ChatId::Room(room_id), f.peer, "them".into());

        f.router.on_room_message(room_id, own, &mut f.sink);
        f.router.on_room_message(room_id, other.clone(), &mut f.sink);

        assert_eq!(f.sink.displayed, vec![(ChatId::Room(room_id), other, false)]);
    }
}
