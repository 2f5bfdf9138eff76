//! Per-tick performance and accounting metrics.

use std::time::Duration;

/// Metrics for one executed tick.
///
/// The simulator's observability surface: no logging framework, just a
/// struct the host can poll after each step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepMetrics {
    /// The tick these metrics describe.
    pub tick: u64,
    /// Wall-clock duration of the whole step.
    pub duration: Duration,
    /// Patches newly generated during this step.
    pub generated_patches: u32,
    /// Agents that moved to a new cell.
    pub moved_agents: u32,
    /// Movers that lost a collision and stayed in place.
    pub collisions_lost: u32,
    /// Scent updates applied across all caught-up patches.
    pub scent_updates: u32,
    /// Items picked up by agents.
    pub items_collected: u32,
    /// Items born through regeneration.
    pub items_regenerated: u32,
    /// Items that reached their lifetime and expired.
    pub items_expired: u32,
}

impl StepMetrics {
    /// Zeroed metrics for `tick`.
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}
