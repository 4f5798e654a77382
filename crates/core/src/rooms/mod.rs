//! Room membership
//!
//! [`RoomRegistry`] is the authoritative state held by the relay.
//! [`RoomCoordinator`] is the client-side view: it validates requests,
//! emits them to the relay and mirrors the snapshots that come back.

mod coordinator;
mod registry;

pub use coordinator::*;
pub use registry::*;
