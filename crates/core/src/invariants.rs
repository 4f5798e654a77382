//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::models::Room;
use crate::session::{ChannelState, NegotiationState, PeerSession, PeerTransport};

/// Validate that a room's membership is internally consistent
pub fn assert_room_invariants(room: &Room) {
    // Leader is always a member
    debug_assert!(
        room.members.contains(&room.leader_id),
        "Room {} leader {} is not a member",
        room.id,
        room.leader_id
    );

    // Members are unique
    let mut seen = std::collections::HashSet::new();
    debug_assert!(
        room.members.iter().all(|m| seen.insert(*m)),
        "Room {} has duplicate members",
        room.id
    );

    // Private rooms keep a pin, public ones never do
    debug_assert!(
        room.is_private == room.pin.is_some(),
        "Room {} privacy flag disagrees with pin",
        room.id
    );

    debug_assert!(
        !room.name.trim().is_empty(),
        "Room {} has empty name",
        room.id
    );
}

/// Validate that a session's state agrees with its channel
pub fn assert_session_invariants<T: PeerTransport>(session: &PeerSession<T>) {
    if session.state() == NegotiationState::Connected {
        debug_assert!(
            session.remote_description_set(),
            "Session {} connected without remote description",
            session.peer_id()
        );
        debug_assert!(
            session.channel_state() == ChannelState::Open,
            "Session {} connected but channel is {:?}",
            session.peer_id(),
            session.channel_state()
        );
    }

    // Buffered candidates only exist until the remote description lands
    if session.remote_description_set() {
        debug_assert!(
            session.pending_candidates() == 0,
            "Session {} still buffers {} candidates",
            session.peer_id(),
            session.pending_candidates()
        );
    }
}
