//! TCP client for the relay
//!
//! After the `user:join` handshake the connection is split into a reader
//! task that queues inbound events and a writer task that drains the
//! outbox. The outbox is an unbounded sender, so it can be handed to a
//! [`PeerNode`](peerlink_core::PeerNode) as its signaling channel.

use std::net::SocketAddr;
use std::sync::Arc;

use peerlink_core::{NodeEvent, SignalEvent};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};

/// Inbound events buffered before the reader waits
const INBOUND_QUEUE: usize = 256;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Client handle for a relay connection
pub struct Client {
    user_id: Uuid,
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::Receiver<SignalEvent>,
    outbox: mpsc::UnboundedSender<SignalEvent>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl Client {
    /// Connect and announce `name`, proposing `previous_id` for reuse
    pub async fn connect(addr: SocketAddr, name: &str, previous_id: Option<Uuid>) -> Result<Self> {
        info!(addr = %addr, "Connecting to relay");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let join = SignalEvent::UserJoin {
            name: name.to_string(),
            user_id: previous_id,
        };
        write_frame(&mut writer, &join).await?;

        let user_id = match read_frame(&mut reader).await? {
            SignalEvent::UserJoined { user_id } => user_id,
            SignalEvent::Error { message } => {
                warn!(reason = %message, "Join rejected");
                return Err(Error::Rejected(message));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Expected user:joined, got {}",
                    other.name()
                )))
            }
        };

        info!(user_id = %user_id, "Joined relay");

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(INBOUND_QUEUE);
        let (outbox, out_rx) = mpsc::unbounded_channel();

        let reader_handle = tokio::spawn(reader_task(reader, state.clone(), event_tx));
        let writer_handle = tokio::spawn(writer_task(writer, out_rx));

        Ok(Client {
            user_id,
            state,
            event_rx,
            outbox,
            reader_handle,
            writer_handle,
        })
    }

    /// Id assigned by the relay
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Sender half for outbound events
    pub fn outbox(&self) -> mpsc::UnboundedSender<SignalEvent> {
        self.outbox.clone()
    }

    /// Queue an event for the relay
    pub fn send(&self, event: SignalEvent) -> Result<()> {
        self.outbox.send(event).map_err(|_| Error::NotConnected)
    }

    /// Get the next relay event; `None` once the connection is gone
    pub async fn next_event(&mut self) -> Option<SignalEvent> {
        self.event_rx.recv().await
    }

    /// Feed every relay event into a node queue until either side closes
    pub async fn forward_to(&mut self, node_tx: mpsc::UnboundedSender<NodeEvent>) {
        while let Some(event) = self.event_rx.recv().await {
            if node_tx.send(NodeEvent::Signal(event)).is_err() {
                debug!("Node queue closed, stop forwarding");
                break;
            }
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
        *self.state.write().await = ConnectionState::Disconnected;
        info!("Disconnected from relay");
    }
}

/// Reader task - queues events from the relay
async fn reader_task(
    mut reader: ReadHalf<TcpStream>,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<SignalEvent>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(event) => {
                if event_tx.send(event).await.is_err() {
                    debug!("Event receiver dropped");
                    break;
                }
            }
            Err(Error::Malformed(reason)) => {
                warn!(reason = %reason, "Dropping malformed relay event");
            }
            Err(Error::ConnectionClosed) => {
                debug!("Relay closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }

    *state.write().await = ConnectionState::Disconnected;
}

/// Writer task - sends queued events to the relay
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::UnboundedReceiver<SignalEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &event).await {
            warn!(error = %e, "Write error");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use std::time::Duration;

    use peerlink_core::{
        ChatId, ChatMessage, ChatSink, NodeCommand, NodeConfig, NodeRuntime, Notice, PeerNode,
        ReceivedFile, RelayOnly, Route,
    };

    async fn relay() -> Server {
        Server::start(SocketAddr::from(([127, 0, 0, 1], 0)), 8)
            .await
            .unwrap()
    }

    /// Skip events until one matches
    async fn expect<F>(client: &mut Client, mut pred: F) -> SignalEvent
    where
        F: FnMut(&SignalEvent) -> bool,
    {
        loop {
            let event = client.next_event().await.expect("connection closed");
            if pred(&event) {
                return event;
            }
        }
    }

    /// Sink that forwards every inbound message to the test
    struct InboxSink(mpsc::UnboundedSender<(ChatId, ChatMessage)>);

    impl ChatSink for InboxSink {
        fn display(&mut self, chat: ChatId, message: &ChatMessage, outgoing: bool) {
            if !outgoing {
                let _ = self.0.send((chat, message.clone()));
            }
        }

        fn persist(&mut self, _chat: ChatId, _message: &ChatMessage) {}

        fn file_received(&mut self, _file: ReceivedFile) {}

        fn notify(&mut self, _notice: Notice) {}
    }

    /// Run a relay-only node on `client`; returns its queue and inbox
    fn spawn_node(
        mut client: Client,
    ) -> (
        mpsc::UnboundedSender<NodeEvent>,
        mpsc::UnboundedReceiver<(ChatId, ChatMessage)>,
    ) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let node = PeerNode::new(
            client.user_id(),
            RelayOnly,
            client.outbox(),
            InboxSink(inbox_tx),
            NodeConfig::default(),
        );
        let (node_tx, node_rx) = mpsc::unbounded_channel();
        tokio::spawn(NodeRuntime::new(node, node_rx).run());

        let forward_tx = node_tx.clone();
        tokio::spawn(async move { client.forward_to(forward_tx).await });
        (node_tx, inbox_rx)
    }

    #[tokio::test]
    async fn test_nodes_chat_through_relay() {
        let server = relay().await;
        let alice = Client::connect(server.addr(), "alice", None).await.unwrap();
        let bob = Client::connect(server.addr(), "bob", None).await.unwrap();
        let (alice_id, bob_id) = (alice.user_id(), bob.user_id());

        let (alice_tx, _alice_inbox) = spawn_node(alice);
        let (_bob_tx, mut bob_inbox) = spawn_node(bob);

        alice_tx
            .send(NodeEvent::Command(NodeCommand::SendChat {
                chat: ChatId::Peer(bob_id),
                text: "hello over the relay".into(),
            }))
            .unwrap();

        let (chat, message) = tokio::time::timeout(Duration::from_secs(5), bob_inbox.recv())
            .await
            .expect("message not delivered")
            .unwrap();
        assert_eq!(chat, ChatId::Peer(alice_id));
        assert_eq!(message.sender_id, alice_id);
        assert_eq!(message.text, "hello over the relay");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_client_connect() {
        let server = relay().await;
        let proposed = Uuid::new_v4();

        let mut client = Client::connect(server.addr(), "ada", Some(proposed))
            .await
            .unwrap();
        assert_eq!(client.user_id(), proposed);

        let list = expect(&mut client, |e| matches!(e, SignalEvent::UserList(_))).await;
        match list {
            SignalEvent::UserList(users) => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].display_name, "ada");
            }
            _ => unreachable!(),
        }

        client.disconnect().await;
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_taken_id_is_not_reused() {
        let server = relay().await;
        let first = Client::connect(server.addr(), "ada", None).await.unwrap();
        let second = Client::connect(server.addr(), "bob", Some(first.user_id()))
            .await
            .unwrap();

        assert_ne!(first.user_id(), second.user_id());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let server = relay().await;
        let result = Client::connect(server.addr(), "  ", None).await;
        assert!(matches!(result, Err(Error::Rejected(_))));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_relay_forwards_addressed_message() {
        let server = relay().await;
        let mut alice = Client::connect(server.addr(), "alice", None).await.unwrap();
        let mut bob = Client::connect(server.addr(), "bob", None).await.unwrap();

        let message = ChatMessage::new(ChatId::Peer(bob.user_id()), alice.user_id(), "hi bob".into());
        alice
            .send(SignalEvent::MessageSend {
                route: Route::to(bob.user_id()),
                message: message.clone(),
            })
            .unwrap();

        let received = expect(&mut bob, |e| matches!(e, SignalEvent::MessageSend { .. })).await;
        assert_eq!(received.sender(), Some(alice.user_id()));
        match received {
            SignalEvent::MessageSend { route, message: got } => {
                assert_eq!(route.target_user_id, None);
                assert_eq!(got, message);
            }
            _ => unreachable!(),
        }

        // Unknown target comes back as an error
        alice
            .send(SignalEvent::MessageSend {
                route: Route::to(Uuid::new_v4()),
                message,
            })
            .unwrap();
        expect(&mut alice, |e| matches!(e, SignalEvent::Error { .. })).await;

        server.shutdown();
    }

    #[tokio::test]
    async fn test_private_room_pin_flow() {
        let server = relay().await;
        let mut leader = Client::connect(server.addr(), "leader", None).await.unwrap();
        let mut guest = Client::connect(server.addr(), "guest", None).await.unwrap();

        leader
            .send(SignalEvent::RoomCreate {
                name: "vault".into(),
                is_private: true,
                pin: Some("1234".into()),
            })
            .unwrap();
        let created = expect(&mut leader, |e| matches!(e, SignalEvent::RoomCreated(_))).await;
        let SignalEvent::RoomCreated(notice) = created else {
            unreachable!()
        };
        let room_id = notice.room_id;

        guest
            .send(SignalEvent::RoomJoin {
                room_id,
                pin: Some("0000".into()),
            })
            .unwrap();
        expect(&mut guest, |e| matches!(e, SignalEvent::Error { .. })).await;
        assert_eq!(server.rooms().await[0].members, vec![leader.user_id()]);

        guest
            .send(SignalEvent::RoomJoin {
                room_id,
                pin: Some("1234".into()),
            })
            .unwrap();
        expect(&mut guest, |e| matches!(e, SignalEvent::RoomJoined(_))).await;

        let update = expect(&mut leader, |e| matches!(e, SignalEvent::RoomUpdate(_))).await;
        let SignalEvent::RoomUpdate(notice) = update else {
            unreachable!()
        };
        let members = notice.room.unwrap().members;
        assert_eq!(members, vec![leader.user_id(), guest.user_id()]);

        // Room messages reach the other members only
        let message = ChatMessage::new(ChatId::Room(room_id), guest.user_id(), "hello".into());
        guest
            .send(SignalEvent::RoomMessage { room_id, message })
            .unwrap();
        let got = expect(&mut leader, |e| matches!(e, SignalEvent::RoomMessage { .. })).await;
        assert!(matches!(
            got,
            SignalEvent::RoomMessage { message, .. } if message.text == "hello"
        ));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_leaves_rooms() {
        let server = relay().await;
        let mut leader = Client::connect(server.addr(), "leader", None).await.unwrap();
        let mut guest = Client::connect(server.addr(), "guest", None).await.unwrap();

        leader
            .send(SignalEvent::RoomCreate {
                name: "lobby".into(),
                is_private: false,
                pin: None,
            })
            .unwrap();
        let SignalEvent::RoomCreated(notice) =
            expect(&mut leader, |e| matches!(e, SignalEvent::RoomCreated(_))).await
        else {
            unreachable!()
        };
        guest
            .send(SignalEvent::RoomJoin {
                room_id: notice.room_id,
                pin: None,
            })
            .unwrap();
        expect(&mut guest, |e| matches!(e, SignalEvent::RoomJoined(_))).await;

        leader.disconnect().await;

        let update = expect(&mut guest, |e| matches!(e, SignalEvent::RoomUpdate(_))).await;
        let SignalEvent::RoomUpdate(notice) = update else {
            unreachable!()
        };
        let room = notice.room.unwrap();
        assert_eq!(room.leader_id, guest.user_id());
        assert_eq!(room.members, vec![guest.user_id()]);

        let users = expect(&mut guest, |e| {
            matches!(e, SignalEvent::UserList(users) if users.len() == 1)
        })
        .await;
        assert!(matches!(users, SignalEvent::UserList(_)));

        server.shutdown();
    }
}
