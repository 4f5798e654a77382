//! Wire vocabulary
//!
//! Two closed sets of tagged messages:
//!
//! - [`SignalEvent`]: events exchanged with the relay, JSON
//!   `{"event": "<name>", "payload": {...}}`
//! - [`DirectPayload`]: payloads written to an established direct channel,
//!   JSON `{"type": "<tag>", "data": {...}}`
//!
//! Chat and file payloads exist in both sets with identical meaning; the
//! relay variants additionally carry a [`Route`].

mod payload;
mod signal;

pub use payload::*;
pub use signal::*;
