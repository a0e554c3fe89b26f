//! Demo network configuration

use serde::{Deserialize, Serialize};

/// Parameters of the in-process validator network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of in-process validators
    pub validators: usize,
    /// Round zero timeout in milliseconds
    pub base_timeout_ms: u64,
    /// Round-change re-announcement interval in milliseconds
    pub rebroadcast_ms: u64,
    /// Gossip duplicate-suppression history size
    pub gossip_history_limit: usize,
    /// Fraction of dispatches dropped to simulate loss
    pub drop_rate: f64,
    /// Seconds to run before shutting down
    pub run_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            base_timeout_ms: 1000,
            rebroadcast_ms: 5000,
            gossip_history_limit: 1000,
            drop_rate: 0.2,
            run_secs: 20,
        }
    }
}
