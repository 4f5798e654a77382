//! Async driver for a [`PeerNode`]
//!
//! Feeds queued events to the node one at a time and fires the file
//! pacing timer in between. Runs until every event sender is dropped.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::node::{NodeEvent, PeerNode};
use crate::session::TransportFactory;
use crate::signaling::SignalingChannel;
use crate::sink::ChatSink;

/// Owns a node and its inbound queue
pub struct NodeRuntime<F: TransportFactory, S, K> {
    node: PeerNode<F, S, K>,
    events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl<F, S, K> NodeRuntime<F, S, K>
where
    F: TransportFactory,
    S: SignalingChannel,
    K: ChatSink,
{
    pub fn new(node: PeerNode<F, S, K>, events: mpsc::UnboundedReceiver<NodeEvent>) -> Self {
        Self { node, events }
    }

    /// Process events until the queue closes, then hand the node back.
    ///
    /// Pending outgoing frames are still flushed on their schedule after
    /// the queue closes.
    pub async fn run(mut self) -> PeerNode<F, S, K> {
        info!("Node runtime started");
        let mut open = true;

        loop {
            let due = self.node.next_due();
            if !open && due.is_none() {
                break;
            }

            tokio::select! {
                event = self.events.recv(), if open => match event {
                    Some(event) => self.node.handle(event, Instant::now()),
                    None => {
                        debug!("Event queue closed");
                        open = false;
                    }
                },
                _ = wait_for(due) => {
                    self.node.pump_transfers(Instant::now());
                }
            }
        }

        info!("Node runtime stopped");
        self.node
    }
}

async fn wait_for(due: Option<Instant>) {
    match due {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
