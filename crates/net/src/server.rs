//! TCP relay server
//!
//! Clients announce themselves with `user:join`, then exchange signaling,
//! relay-path chat and file events through the relay. The relay holds the
//! authoritative room registry and forwards addressed events between users.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use peerlink_core::{ChatId, RoomChange, RoomNotice, RoomRegistry, RoomSnapshot, SignalEvent, User};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};

/// Events queued per connection. A user whose queue is full misses
/// further events until the writer catches up.
const OUTBOUND_QUEUE: usize = 64;

/// Connected user
struct Connection {
    user: User,
    joined_at: DateTime<Utc>,
    tx: mpsc::Sender<SignalEvent>,
}

/// Events to deliver once the state guard is released
#[derive(Default)]
struct Outbox {
    items: Vec<(mpsc::Sender<SignalEvent>, SignalEvent)>,
}

impl Outbox {
    fn push(&mut self, state: &RelayState, user_id: Uuid, event: SignalEvent) {
        if let Some(conn) = state.users.get(&user_id) {
            self.items.push((conn.tx.clone(), event));
        }
    }

    fn push_all(&mut self, state: &RelayState, user_ids: &[Uuid], event: &SignalEvent) {
        for user_id in user_ids {
            self.push(state, *user_id, event.clone());
        }
    }

    fn broadcast(&mut self, state: &RelayState, event: &SignalEvent) {
        for conn in state.users.values() {
            self.items.push((conn.tx.clone(), event.clone()));
        }
    }

    /// Queue every event without waiting on a slow reader
    fn flush(self) {
        for (tx, event) in self.items {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(event = event.name(), "Outbound queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Failed to queue event for departed user");
                }
            }
        }
    }
}

/// Relay state shared across tasks
struct RelayState {
    users: HashMap<Uuid, Connection>,
    rooms: RoomRegistry,
    max_users: usize,
}

impl RelayState {
    /// Connected users in join order
    fn user_list(&self) -> Vec<User> {
        let mut conns: Vec<&Connection> = self.users.values().collect();
        conns.sort_by_key(|c| c.joined_at);
        conns.into_iter().map(|c| c.user.clone()).collect()
    }

    fn room_list(&self) -> SignalEvent {
        SignalEvent::RoomList(self.rooms.list())
    }

    /// Queue `room:update` for current members and `room:list` for everyone
    fn announce_change(&self, outbox: &mut Outbox, change: &RoomChange, skip: &[Uuid]) {
        if let Some(room) = &change.room {
            let update = SignalEvent::RoomUpdate(RoomNotice {
                room_id: change.room_id,
                room: Some(room.clone()),
            });
            let members: Vec<Uuid> = room
                .members
                .iter()
                .filter(|m| !skip.contains(m))
                .copied()
                .collect();
            outbox.push_all(self, &members, &update);
        }
        outbox.broadcast(self, &self.room_list());
    }
}

/// Relay server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<RwLock<RelayState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind and start accepting connections
    pub async fn start(addr: SocketAddr, max_users: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, max_users, "Relay started");

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(RelayState {
            users: HashMap::new(),
            rooms: RoomRegistry::new(),
            max_users,
        }));

        let state_clone = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(accept_loop(listener, state_clone, shutdown_rx));

        Ok(Server {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connected users in join order
    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.user_list()
    }

    pub async fn rooms(&self) -> Vec<RoomSnapshot> {
        self.state.read().await.rooms.list()
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Relay shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<RelayState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let state = state.clone();
                        tokio::spawn(handle_connection(stream, addr, state));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<RwLock<RelayState>>) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);

    let user_id = match handle_join(&mut reader, &state, tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Join failed");
            let reply = SignalEvent::Error {
                message: e.to_string(),
            };
            let _ = write_frame(&mut writer, &reply).await;
            return;
        }
    };

    info!(addr = %addr, user_id = %user_id, "User joined");

    let writer_handle = tokio::spawn(writer_task(writer, rx));

    loop {
        match read_frame(&mut reader).await {
            Ok(event) => handle_event(event, user_id, &state).await,
            Err(Error::Malformed(reason)) => {
                warn!(user_id = %user_id, reason = %reason, "Dropping malformed event");
                reply_error(&state, user_id, format!("Malformed event: {}", reason)).await;
            }
            Err(Error::ConnectionClosed) => {
                debug!(user_id = %user_id, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Read error");
                break;
            }
        }
    }

    remove_user(&state, user_id).await;
    writer_handle.abort();

    info!(user_id = %user_id, "User disconnected");
}

/// Handle the `user:join` announcement
async fn handle_join(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<RelayState>>,
    tx: mpsc::Sender<SignalEvent>,
) -> Result<Uuid> {
    let event = read_frame(reader).await?;

    let SignalEvent::UserJoin { name, user_id } = event else {
        return Err(Error::Protocol("Expected user:join".into()));
    };

    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(Error::Rejected("Name must not be empty".into()));
    }

    let mut outbox = Outbox::default();
    let user_id = {
        let mut s = state.write().await;

        if s.users.len() >= s.max_users {
            return Err(Error::ServerFull);
        }

        // Reuse the proposed id unless someone holds it
        let user_id = match user_id {
            Some(id) if !s.users.contains_key(&id) => id,
            _ => Uuid::new_v4(),
        };

        s.users.insert(
            user_id,
            Connection {
                user: User::new(user_id, name),
                joined_at: Utc::now(),
                tx,
            },
        );

        outbox.push(&s, user_id, SignalEvent::UserJoined { user_id });
        outbox.push(&s, user_id, s.room_list());
        outbox.broadcast(&s, &SignalEvent::UserList(s.user_list()));
        user_id
    };
    outbox.flush();

    Ok(user_id)
}

/// Writer task - sends events to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<SignalEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &event).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle an event from a joined user
async fn handle_event(event: SignalEvent, sender_id: Uuid, state: &Arc<RwLock<RelayState>>) {
    let mut outbox = Outbox::default();
    {
        let mut s = state.write().await;
        if let Err(e) = apply_event(&mut s, &mut outbox, event, sender_id) {
            debug!(user_id = %sender_id, error = %e, "Request rejected");
            outbox.push(
                &s,
                sender_id,
                SignalEvent::Error {
                    message: e.to_string(),
                },
            );
        }
    }
    outbox.flush();
}

/// Send an `error` event to one user
async fn reply_error(state: &Arc<RwLock<RelayState>>, user_id: Uuid, message: String) {
    let mut outbox = Outbox::default();
    outbox.push(&*state.read().await, user_id, SignalEvent::Error { message });
    outbox.flush();
}

/// Apply one event to the relay state, queueing every resulting delivery
fn apply_event(
    s: &mut RelayState,
    outbox: &mut Outbox,
    event: SignalEvent,
    sender_id: Uuid,
) -> std::result::Result<(), peerlink_core::Error> {
    match event {
        SignalEvent::RoomCreate {
            name,
            is_private,
            pin,
        } => {
            let room = s.rooms.create(sender_id, &name, is_private, pin.as_deref())?;
            outbox.push(
                s,
                sender_id,
                SignalEvent::RoomCreated(RoomNotice {
                    room_id: room.id,
                    room: Some(room),
                }),
            );
            outbox.broadcast(s, &s.room_list());
        }
        SignalEvent::RoomJoin { room_id, pin } => {
            let change = s.rooms.join(sender_id, room_id, pin.as_deref())?;
            outbox.push(
                s,
                sender_id,
                SignalEvent::RoomJoined(RoomNotice {
                    room_id,
                    room: change.room.clone(),
                }),
            );
            s.announce_change(outbox, &change, &[sender_id]);
        }
        SignalEvent::RoomLeave { room_id } => {
            let change = s.rooms.leave(sender_id, room_id)?;
            outbox.push(
                s,
                sender_id,
                SignalEvent::RoomLeft(RoomNotice {
                    room_id,
                    room: change.room.clone(),
                }),
            );
            s.announce_change(outbox, &change, &[]);
        }
        SignalEvent::RoomKick {
            room_id,
            target_user_id,
        } => {
            let change = s.rooms.kick(sender_id, room_id, target_user_id)?;
            outbox.push(
                s,
                target_user_id,
                SignalEvent::RoomKicked(RoomNotice {
                    room_id,
                    room: change.room.clone(),
                }),
            );
            s.announce_change(outbox, &change, &[]);
        }
        SignalEvent::RoomMessage {
            room_id,
            mut message,
        } => {
            if !s.rooms.is_member(room_id, sender_id) {
                return Err(peerlink_core::Error::RoomAuthorization(
                    "Not a member of this room".into(),
                ));
            }
            message.sender_id = sender_id;
            message.chat_id = ChatId::Room(room_id);

            let others: Vec<Uuid> = s
                .rooms
                .members(room_id)
                .into_iter()
                .filter(|m| *m != sender_id)
                .collect();
            outbox.push_all(s, &others, &SignalEvent::RoomMessage { room_id, message });
        }
        event @ (SignalEvent::Offer { .. }
        | SignalEvent::Answer { .. }
        | SignalEvent::Ice { .. }
        | SignalEvent::MessageSend { .. }
        | SignalEvent::FileStart { .. }
        | SignalEvent::FileChunk { .. }
        | SignalEvent::FileEnd { .. }) => {
            let name = event.name();
            let Some((target, forwarded)) = event.into_forwarded(sender_id) else {
                return Err(peerlink_core::Error::MalformedPayload(format!(
                    "{} without targetUserId",
                    name
                )));
            };
            if !s.users.contains_key(&target) {
                return Err(peerlink_core::Error::NotFound(format!("user {}", target)));
            }
            outbox.push(s, target, forwarded);
        }
        SignalEvent::UserJoin { .. } => {
            return Err(peerlink_core::Error::InvalidOperation("Already joined".into()));
        }
        other => {
            debug!(user_id = %sender_id, event = other.name(), "Ignoring relay-bound event");
        }
    }
    Ok(())
}

/// Remove a user from the relay and from every room they belonged to
async fn remove_user(state: &Arc<RwLock<RelayState>>, user_id: Uuid) {
    let mut outbox = Outbox::default();
    {
        let mut s = state.write().await;
        s.users.remove(&user_id);

        let changes = s.rooms.remove_user(user_id);
        for change in &changes {
            if let Some(room) = &change.room {
                let update = SignalEvent::RoomUpdate(RoomNotice {
                    room_id: change.room_id,
                    room: Some(room.clone()),
                });
                outbox.push_all(&s, &room.members, &update);
            }
        }

        outbox.broadcast(&s, &SignalEvent::UserList(s.user_list()));
        outbox.broadcast(&s, &s.room_list());
    }
    outbox.flush();
}
