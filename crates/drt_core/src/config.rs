//! Tunables for insertion and rebalancing.
//!
//! Both structs deserialize with every field optional so a host can load a
//! partial configuration; missing values fall back to [`Default`]. They are
//! also ECS resources, like the scenario parameters of the host simulation.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::SimTime;

/// Insertion optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dwell time of every pickup and dropoff stop (seconds).
    pub stop_duration_secs: SimTime,
    /// Straight-line pre-filter between a vehicle's anchor and the pickup.
    /// `None` evaluates every vehicle.
    pub max_candidate_distance_km: Option<f64>,
    /// Searches repeated when the winning vehicle changed before commit.
    pub max_commit_attempts: u32,
    /// Keep infeasible requests queued and retry them until they expire.
    pub retry_unplanned: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            stop_duration_secs: 60,
            max_candidate_distance_km: None,
            max_commit_attempts: 3,
            retry_unplanned: true,
        }
    }
}

/// How surplus vehicles are paired with deficit zones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocationMatching {
    /// Nearest surplus vehicle for each deficit slot, largest deficits first.
    #[default]
    Greedy,
    /// Minimum total relocation distance (Kuhn-Munkres assignment).
    MinCost,
}

/// Which target calculator the rebalancer uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TargetStrategyKind {
    EqualShare,
    DemandWeighted { alpha: f64, beta: f64 },
    ForecastMatching { minimum_reserve: f64 },
}

impl Default for TargetStrategyKind {
    fn default() -> Self {
        Self::DemandWeighted {
            alpha: 1.0,
            beta: 0.0,
        }
    }
}

/// Rebalancing dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct RebalancingConfig {
    /// Period between rebalancing cycles (seconds).
    pub interval_secs: SimTime,
    pub max_relocations_per_cycle: usize,
    pub max_relocation_distance_km: f64,
    /// Vehicles closer than this to the end of their service are not moved.
    pub min_service_time_remaining_secs: SimTime,
    /// Look-back window of the observed demand signal (seconds).
    pub demand_window_secs: SimTime,
    pub matching: RelocationMatching,
    pub target_strategy: TargetStrategyKind,
}

impl Default for RebalancingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1_800,
            max_relocations_per_cycle: 100,
            max_relocation_distance_km: 10.0,
            min_service_time_remaining_secs: 3_600,
            demand_window_secs: 3_600,
            matching: RelocationMatching::Greedy,
            target_strategy: TargetStrategyKind::default(),
        }
    }
}
