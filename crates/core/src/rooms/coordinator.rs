use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{is_valid_pin, validate_room_request, ChatId, RoomSnapshot};
use crate::protocol::{RoomNotice, SignalEvent};
use crate::signaling::SignalingChannel;
use crate::sink::{ChatSink, Notice};

/// Client-side room state mirrored from relay snapshots
#[derive(Debug)]
pub struct RoomCoordinator {
    local_id: Uuid,
    rooms: HashMap<Uuid, RoomSnapshot>,
    /// Relay order of the last `room:list`
    order: Vec<Uuid>,
}

impl RoomCoordinator {
    pub fn new(local_id: Uuid) -> Self {
        Self {
            local_id,
            rooms: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn set_local_id(&mut self, local_id: Uuid) {
        self.local_id = local_id;
    }

    /// Request a new room
    pub fn create(
        &self,
        signaling: &mut impl SignalingChannel,
        name: &str,
        is_private: bool,
        pin: Option<&str>,
    ) -> Result<()> {
        validate_room_request(name, is_private, pin)?;

        debug!(name = %name, is_private, "Requesting room");
        signaling.send(SignalEvent::RoomCreate {
            name: name.trim().to_string(),
            is_private,
            pin: if is_private { pin.map(str::to_string) } else { None },
        });
        Ok(())
    }

    /// Request to join a room
    pub fn join(
        &self,
        signaling: &mut impl SignalingChannel,
        room_id: Uuid,
        pin: Option<&str>,
    ) -> Result<()> {
        if let Some(room) = self.rooms.get(&room_id) {
            if room.is_private && !pin.is_some_and(is_valid_pin) {
                return Err(Error::RoomAuthorization(
                    "This room requires a 4-digit pin".into(),
                ));
            }
        }

        signaling.send(SignalEvent::RoomJoin {
            room_id,
            pin: pin.map(str::to_string),
        });
        Ok(())
    }

    /// Request to leave a room
    pub fn leave(&self, signaling: &mut impl SignalingChannel, room_id: Uuid) -> Result<()> {
        if let Some(room) = self.rooms.get(&room_id) {
            if !room.is_member(self.local_id) {
                return Err(Error::RoomAuthorization("Not a member of this room".into()));
            }
        }

        signaling.send(SignalEvent::RoomLeave { room_id });
        Ok(())
    }

    /// Ask the relay to remove a member. Leader only.
    pub fn kick(
        &self,
        signaling: &mut impl SignalingChannel,
        room_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<()> {
        let room = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))?;

        if !room.is_leader(self.local_id) {
            return Err(Error::RoomAuthorization(
                "Only the room leader can kick members".into(),
            ));
        }
        if target_user_id == self.local_id {
            return Err(Error::InvalidOperation("Cannot kick yourself".into()));
        }
        if !room.is_member(target_user_id) {
            return Err(Error::NotFound(format!("member {}", target_user_id)));
        }

        signaling.send(SignalEvent::RoomKick {
            room_id,
            target_user_id,
        });
        Ok(())
    }

    /// Replace the cache with a fresh `room:list`
    pub fn on_room_list(&mut self, rooms: Vec<RoomSnapshot>) {
        self.order = rooms.iter().map(|r| r.id).collect();
        self.rooms = rooms.into_iter().map(|r| (r.id, r)).collect();
        debug!(count = self.order.len(), "Room list updated");
    }

    /// `room:created`, `room:joined` or `room:update`
    pub fn on_snapshot(&mut self, notice: RoomNotice) {
        match notice.room {
            Some(room) => {
                if !self.order.contains(&room.id) {
                    self.order.push(room.id);
                }
                self.rooms.insert(room.id, room);
            }
            None => self.forget(notice.room_id),
        }
    }

    /// `room:left` or `room:kicked`: we are no longer a member.
    ///
    /// Closes the active chat when it is bound to that room.
    pub fn on_removed(
        &mut self,
        notice: RoomNotice,
        kicked: bool,
        active_chat: &mut Option<ChatId>,
        sink: &mut impl ChatSink,
    ) {
        let room_id = notice.room_id;
        match notice.room {
            Some(room) => {
                self.rooms.insert(room_id, room);
            }
            None => self.forget(room_id),
        }

        if kicked {
            info!(room_id = %room_id, "Kicked from room");
            sink.notify(Notice::Kicked { room_id });
        }

        let chat = ChatId::Room(room_id);
        if *active_chat == Some(chat) {
            *active_chat = None;
            sink.notify(Notice::ChatClosed { chat });
        }
    }

    /// Rooms in relay order
    pub fn rooms(&self) -> Vec<&RoomSnapshot> {
        self.order.iter().filter_map(|id| self.rooms.get(id)).collect()
    }

    pub fn room(&self, room_id: Uuid) -> Option<&RoomSnapshot> {
        self.rooms.get(&room_id)
    }

    /// Whether the local user belongs to a cached room
    pub fn is_member(&self, room_id: Uuid) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|r| r.is_member(self.local_id))
    }

    fn forget(&mut self, room_id: Uuid) {
        self.rooms.remove(&room_id);
        self.order.retain(|id| *id != room_id);
    }
}
