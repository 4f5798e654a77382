//! Node tuning knobs

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::DeliveryPath;

/// Fixed chunk size for file transfers (512 KiB)
pub const CHUNK_SIZE: usize = 512 * 1024;

/// Client node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Pause after each chunk written to a direct channel
    pub direct_pacing_ms: u64,
    /// Pause after each chunk sent through the relay
    pub relay_pacing_ms: u64,
    /// Candidates kept per peer while no remote description is applied
    pub max_buffered_candidates: usize,
}

impl NodeConfig {
    /// Pacing delay for a delivery path
    pub fn pacing(&self, path: DeliveryPath) -> Duration {
        match path {
            DeliveryPath::Direct => Duration::from_millis(self.direct_pacing_ms),
            DeliveryPath::Relay => Duration::from_millis(self.relay_pacing_ms),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            direct_pacing_ms: 10,
            relay_pacing_ms: 50,
            max_buffered_candidates: 64,
        }
    }
}
