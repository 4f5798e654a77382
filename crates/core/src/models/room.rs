//! Room model - public or pin-protected group chats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Number of digits in a private room pin
pub const PIN_LENGTH: usize = 4;

/// A room as held by the relay (authoritative, includes the pin)
#[derive(Debug, Clone)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub is_private: bool,
    pub pin: Option<String>,
    pub leader_id: Uuid,
    /// Members in join order, no duplicates
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Create a room with the creator as leader and sole member
    pub fn new(name: String, is_private: bool, pin: Option<String>, leader_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            is_private,
            pin: if is_private { pin } else { None },
            leader_id,
            members: vec![leader_id],
            created_at: Utc::now(),
        }
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_leader(&self, user_id: Uuid) -> bool {
        self.leader_id == user_id
    }

    /// Public rooms accept any pin; private rooms require an exact match
    pub fn pin_matches(&self, pin: Option<&str>) -> bool {
        if !self.is_private {
            return true;
        }
        match (&self.pin, pin) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        }
    }

    /// Client-facing view of the room. Never carries the pin.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            name: self.name.clone(),
            is_private: self.is_private,
            leader_id: self.leader_id,
            members: self.members.clone(),
        }
    }
}

/// Room state as broadcast to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: Uuid,
    pub name: String,
    pub is_private: bool,
    pub leader_id: Uuid,
    pub members: Vec<Uuid>,
}

impl RoomSnapshot {
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_leader(&self, user_id: Uuid) -> bool {
        self.leader_id == user_id
    }
}

/// A pin is exactly four ASCII digits
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Validate a room creation request (shared by client and relay)
pub fn validate_room_request(name: &str, is_private: bool, pin: Option<&str>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidOperation("Room name must not be empty".into()));
    }

    if is_private && !pin.is_some_and(is_valid_pin) {
        return Err(Error::InvalidOperation(format!(
            "Private rooms need a {}-digit pin",
            PIN_LENGTH
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_validation() {
        assert!(is_valid_pin("1234"));
        assert!(is_valid_pin("0000"));
        assert!(!is_valid_pin("123"));
        assert!(!is_valid_pin("12345"));
        assert!(!is_valid_pin("12a4"));
    }

    #[test]
    fn test_room_request_validation() {
        assert!(validate_room_request("lobby", false, None).is_ok());
        assert!(validate_room_request("lobby", false, Some("junk")).is_ok());
        assert!(validate_room_request("  ", false, None).is_err());
        assert!(validate_room_request("vault", true, None).is_err());
        assert!(validate_room_request("vault", true, Some("12")).is_err());
        assert!(validate_room_request("vault", true, Some("1234")).is_ok());
    }

    #[test]
    fn test_public_room_ignores_pin() {
        let room = Room::new("lobby".into(), false, Some("1234".into()), Uuid::new_v4());
        assert!(room.pin.is_none());
        assert!(room.pin_matches(None));
        assert!(room.pin_matches(Some("9999")));
    }

    #[test]
    fn test_snapshot_hides_pin() {
        let leader = Uuid::new_v4();
        let room = Room::new("vault".into(), true, Some("1234".into()), leader);
        let json = serde_json::to_value(room.snapshot()).unwrap();
        assert!(json.get("pin").is_none());
        assert_eq!(json["leaderId"], leader.to_string());
        assert_eq!(json["members"][0], leader.to_string());
    }
}
