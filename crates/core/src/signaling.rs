//! Outbound side of the relay connection
//!
//! Components never talk to a socket directly. They push [`SignalEvent`]s
//! into a [`SignalingChannel`]; the network layer drains it.

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::SignalEvent;

/// Reliable, ordered, addressable bus to the relay
pub trait SignalingChannel {
    /// Queue an event for the relay. Never blocks.
    fn send(&mut self, event: SignalEvent);
}

impl SignalingChannel for mpsc::UnboundedSender<SignalEvent> {
    fn send(&mut self, event: SignalEvent) {
        let name = event.name();
        if mpsc::UnboundedSender::send(self, event).is_err() {
            debug!(event = name, "Relay connection gone, dropping event");
        }
    }
}

/// Collects events in memory
impl SignalingChannel for Vec<SignalEvent> {
    fn send(&mut self, event: SignalEvent) {
        self.push(event);
    }
}

impl<T: SignalingChannel + ?Sized> SignalingChannel for &mut T {
    fn send(&mut self, event: SignalEvent) {
        (**self).send(event);
    }
}
