//! Data models for Peerlink

mod message;
mod room;
mod user;

pub use message::*;
pub use room::*;
pub use user::*;
