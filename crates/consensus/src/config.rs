//! Configuration for the consensus messaging layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::DEFAULT_GOSSIP_HISTORY_LIMIT;

/// Configuration consumed by the messaging core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Maximum message fingerprints tracked for gossip duplicate suppression
    pub gossip_history_limit: usize,
    /// Interval between round-change re-announcements
    pub round_change_rebroadcast: Duration,
    /// Timeout for round zero; doubles with each round number
    pub base_round_timeout: Duration,
    /// Cap on the timeout doubling exponent
    pub max_timeout_exponent: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            gossip_history_limit: DEFAULT_GOSSIP_HISTORY_LIMIT,
            round_change_rebroadcast: Duration::from_secs(5),
            base_round_timeout: Duration::from_secs(1),
            max_timeout_exponent: 10,
        }
    }
}
