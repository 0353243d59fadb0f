// src/external.rs
//! Boundaries to the outside world: pool snapshot feeds, gas price oracles
//! and execution simulators. The engine only talks to these traits; concrete
//! RPC or websocket clients live with the embedding service.

use serde::{Deserialize, Serialize};

use crate::search::Path;
use crate::types::{Amount, VenueId, VenueState};

/// Result of dry-running one path against live state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub success: bool,
    pub output: Amount,
    pub gas_used: u64,
    pub revert_reason: Option<String>,
    /// Venue that caused a revert, when the simulator can tell
    pub failed_venue: Option<VenueId>,
}

impl SimulationOutcome {
    pub fn succeeded(output: Amount, gas_used: u64) -> Self {
        Self {
            success: true,
            output,
            gas_used,
            revert_reason: None,
            failed_venue: None,
        }
    }

    pub fn reverted(reason: impl Into<String>, venue: Option<VenueId>) -> Self {
        Self {
            success: false,
            output: 0,
            gas_used: 0,
            revert_reason: Some(reason.into()),
            failed_venue: venue,
        }
    }
}

/// Source of venue state updates. `Ok(None)` means the feed has ended.
#[async_trait::async_trait]
pub trait PoolSnapshotFeed: Send + Sync {
    async fn next_batch(&self) -> anyhow::Result<Option<Vec<VenueState>>>;
    fn feed_name(&self) -> &str;
}

#[async_trait::async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Current gas price in gwei for `chain`
    async fn current_price(&self, chain: &str) -> anyhow::Result<f64>;
}

#[async_trait::async_trait]
pub trait ExecutionSimulator: Send + Sync {
    async fn simulate(&self, path: &Path, amount: Amount) -> anyhow::Result<SimulationOutcome>;
}
