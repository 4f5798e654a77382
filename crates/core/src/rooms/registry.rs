use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::assert_room_invariants;
use crate::models::{validate_room_request, Room, RoomSnapshot};

/// Membership change produced by a registry operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChange {
    pub room_id: Uuid,
    /// Snapshot after the change, `None` once the room is destroyed
    pub room: Option<RoomSnapshot>,
    /// Members before the change, for notifying departed users
    pub previous_members: Vec<Uuid>,
}

impl RoomChange {
    fn new(room_id: Uuid, room: Option<RoomSnapshot>, previous_members: Vec<Uuid>) -> Self {
        Self {
            room_id,
            room,
            previous_members,
        }
    }
}

/// Authoritative room state
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<Uuid, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room led by `leader_id`
    pub fn create(
        &mut self,
        leader_id: Uuid,
        name: &str,
        is_private: bool,
        pin: Option<&str>,
    ) -> Result<RoomSnapshot> {
        validate_room_request(name, is_private, pin)?;

        let room = Room::new(
            name.trim().to_string(),
            is_private,
            pin.map(str::to_string),
            leader_id,
        );
        assert_room_invariants(&room);

        info!(room_id = %room.id, leader_id = %leader_id, is_private, "Room created");
        let snapshot = room.snapshot();
        self.rooms.insert(room.id, room);
        Ok(snapshot)
    }

    /// Join a room. Wrong pins leave the room untouched.
    pub fn join(&mut self, user_id: Uuid, room_id: Uuid, pin: Option<&str>) -> Result<RoomChange> {
        let room = self.room_mut(room_id)?;

        if room.is_member(user_id) {
            debug!(room_id = %room_id, user_id = %user_id, "Already a member");
            return Ok(RoomChange::new(room_id, Some(room.snapshot()), room.members.clone()));
        }

        if !room.pin_matches(pin) {
            return Err(Error::RoomAuthorization("Incorrect room pin".into()));
        }

        let previous = room.members.clone();
        room.members.push(user_id);
        assert_room_invariants(room);

        info!(room_id = %room_id, user_id = %user_id, "Joined room");
        Ok(RoomChange::new(room_id, Some(room.snapshot()), previous))
    }

    /// Leave a room.
    ///
    /// A departing leader hands over to the earliest-joined remaining
    /// member; the last member leaving destroys the room.
    pub fn leave(&mut self, user_id: Uuid, room_id: Uuid) -> Result<RoomChange> {
        let room = self.room_mut(room_id)?;

        if !room.is_member(user_id) {
            return Err(Error::RoomAuthorization("Not a member of this room".into()));
        }

        let previous = room.members.clone();
        Ok(self.remove_member(room_id, user_id, previous))
    }

    /// Remove `target_id` on behalf of the leader
    pub fn kick(&mut self, actor_id: Uuid, room_id: Uuid, target_id: Uuid) -> Result<RoomChange> {
        let room = self.room_mut(room_id)?;

        if !room.is_leader(actor_id) {
            return Err(Error::RoomAuthorization(
                "Only the room leader can kick members".into(),
            ));
        }
        if target_id == actor_id {
            return Err(Error::InvalidOperation("Cannot kick yourself".into()));
        }
        if !room.is_member(target_id) {
            return Err(Error::NotFound(format!("member {}", target_id)));
        }

        let previous = room.members.clone();
        info!(room_id = %room_id, target_id = %target_id, "Member kicked");
        Ok(self.remove_member(room_id, target_id, previous))
    }

    /// Drop a disconnected user from every room
    pub fn remove_user(&mut self, user_id: Uuid) -> Vec<RoomChange> {
        let mut joined: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = self
            .rooms
            .values()
            .filter(|r| r.is_member(user_id))
            .map(|r| (r.id, r.created_at))
            .collect();
        joined.sort_by_key(|(_, created_at)| *created_at);

        joined
            .into_iter()
            .filter_map(|(room_id, _)| {
                let previous = self.rooms.get(&room_id)?.members.clone();
                Some(self.remove_member(room_id, user_id, previous))
            })
            .collect()
    }

    /// Snapshots of every room, oldest first
    pub fn list(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<&Room> = self.rooms.values().collect();
        rooms.sort_by_key(|r| r.created_at);
        rooms.into_iter().map(Room::snapshot).collect()
    }

    pub fn get(&self, room_id: Uuid) -> Option<RoomSnapshot> {
        self.rooms.get(&room_id).map(Room::snapshot)
    }

    pub fn is_member(&self, room_id: Uuid, user_id: Uuid) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|r| r.is_member(user_id))
    }

    pub fn members(&self, room_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .get(&room_id)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn room_mut(&mut self, room_id: Uuid) -> Result<&mut Room> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))
    }

    fn remove_member(&mut self, room_id: Uuid, user_id: Uuid, previous: Vec<Uuid>) -> RoomChange {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return RoomChange::new(room_id, None, previous);
        };

        room.members.retain(|m| *m != user_id);

        if room.members.is_empty() {
            self.rooms.remove(&room_id);
            info!(room_id = %room_id, "Room empty, removed");
            return RoomChange::new(room_id, None, previous);
        }

        if room.leader_id == user_id {
            room.leader_id = room.members[0];
            info!(room_id = %room_id, leader_id = %room.leader_id, "Leadership passed on");
        }
        assert_room_invariants(room);

        RoomChange::new(room_id, Some(room.snapshot()), previous)
    }
}
