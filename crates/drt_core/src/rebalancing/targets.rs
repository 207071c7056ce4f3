//! Rebalancing target strategies.
//!
//! Every strategy is a pure function of time, idle supply and demand. Raw
//! targets are capped at `max(idle, demand)`: a zone whose idle supply already
//! covers its demand never gets a target above what it holds, so it never
//! attracts relocations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::TargetStrategyKind;
use crate::spatial::{IdleVehiclesByZone, ZoneId};
use crate::SimTime;

use super::demand::DemandSignal;

/// How fractional targets become vehicle counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rounding {
    Floor,
    Round,
}

impl Rounding {
    pub fn apply(self, value: f64) -> usize {
        let value = match self {
            Self::Floor => value.floor(),
            Self::Round => value.round(),
        };
        if value.is_finite() && value > 0.0 {
            value as usize
        } else {
            0
        }
    }
}

/// Desired number of idle vehicles per zone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetVector {
    targets: BTreeMap<ZoneId, f64>,
}

impl TargetVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, zone: ZoneId, target: f64) {
        self.targets.insert(zone, target);
    }

    /// Target of `zone`, zero when unknown.
    pub fn get(&self, zone: ZoneId) -> f64 {
        self.targets.get(&zone).copied().unwrap_or(0.0)
    }

    pub fn zones(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.targets.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ZoneId, f64)> + '_ {
        self.targets.iter().map(|(zone, target)| (*zone, *target))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl FromIterator<(ZoneId, f64)> for TargetVector {
    fn from_iter<I: IntoIterator<Item = (ZoneId, f64)>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Computes per-zone idle vehicle targets for one rebalancing cycle.
pub trait RebalancingTargetCalculator: Send + Sync {
    fn calculate_targets(
        &self,
        time: SimTime,
        idle: &IdleVehiclesByZone,
        demand: &DemandSignal,
    ) -> TargetVector;

    /// Rounding the dispatcher applies to this strategy's targets.
    fn rounding(&self) -> Rounding;
}

fn idle_count(idle: &IdleVehiclesByZone, zone: ZoneId) -> f64 {
    idle.get(&zone).map_or(0, |vehicles| vehicles.len()) as f64
}

fn total_idle(idle: &IdleVehiclesByZone) -> f64 {
    idle.values().map(|vehicles| vehicles.len()).sum::<usize>() as f64
}

fn known_zones(idle: &IdleVehiclesByZone, demand: &DemandSignal) -> BTreeSet<ZoneId> {
    idle.keys().copied().chain(demand.zones()).collect()
}

/// Apply the demand-aware cap to raw targets over every known zone.
fn capped(
    idle: &IdleVehiclesByZone,
    demand: &DemandSignal,
    raw: impl Fn(ZoneId) -> f64,
) -> TargetVector {
    known_zones(idle, demand)
        .into_iter()
        .map(|zone| {
            let need = demand.get(zone).max(0.0);
            let cap = idle_count(idle, zone).max(need);
            (zone, raw(zone).max(0.0).min(cap))
        })
        .collect()
}

/// Spread the idle fleet evenly over zones with positive demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualShare;

impl RebalancingTargetCalculator for EqualShare {
    fn calculate_targets(
        &self,
        _time: SimTime,
        idle: &IdleVehiclesByZone,
        demand: &DemandSignal,
    ) -> TargetVector {
        let served = demand.iter().filter(|(_, value)| *value > 0.0).count();
        let share = if served > 0 {
            total_idle(idle) / served as f64
        } else {
            0.0
        };
        capped(idle, demand, |zone| {
            if demand.get(zone) > 0.0 {
                share
            } else {
                0.0
            }
        })
    }

    fn rounding(&self) -> Rounding {
        Rounding::Floor
    }
}

/// Linear in demand: `alpha * demand + beta`.
#[derive(Debug, Clone, Copy)]
pub struct DemandWeighted {
    pub alpha: f64,
    pub beta: f64,
}

impl RebalancingTargetCalculator for DemandWeighted {
    fn calculate_targets(
        &self,
        _time: SimTime,
        idle: &IdleVehiclesByZone,
        demand: &DemandSignal,
    ) -> TargetVector {
        capped(idle, demand, |zone| self.alpha * demand.get(zone) + self.beta)
    }

    fn rounding(&self) -> Rounding {
        Rounding::Round
    }
}

/// Split the idle fleet by demand share, keeping `minimum_reserve` vehicles in
/// every zone that has them.
#[derive(Debug, Clone, Copy)]
pub struct ForecastMatching {
    pub minimum_reserve: f64,
}

impl RebalancingTargetCalculator for ForecastMatching {
    fn calculate_targets(
        &self,
        _time: SimTime,
        idle: &IdleVehiclesByZone,
        demand: &DemandSignal,
    ) -> TargetVector {
        let fleet = total_idle(idle);
        let total_demand = demand.total();
        capped(idle, demand, |zone| {
            let share = if total_demand > 0.0 {
                demand.get(zone) / total_demand
            } else {
                0.0
            };
            (fleet * share).max(self.minimum_reserve)
        })
    }

    fn rounding(&self) -> Rounding {
        Rounding::Floor
    }
}

impl TargetStrategyKind {
    pub fn build(self) -> Box<dyn RebalancingTargetCalculator> {
        match self {
            Self::EqualShare => Box::new(EqualShare),
            Self::DemandWeighted { alpha, beta } => Box::new(DemandWeighted { alpha, beta }),
            Self::ForecastMatching { minimum_reserve } => {
                Box::new(ForecastMatching { minimum_reserve })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VehicleId;
    use crate::spatial::ZoneSystem;
    use crate::test_helpers::{cell_at_distance, test_cell};

    fn zones() -> (ZoneId, ZoneId) {
        let system = ZoneSystem::default();
        (
            system.zone_of(test_cell()),
            system.zone_of(cell_at_distance(test_cell(), 30)),
        )
    }

    fn idle(entries: &[(ZoneId, u32)]) -> IdleVehiclesByZone {
        let mut next = 0;
        let mut idle = IdleVehiclesByZone::new();
        for (zone, count) in entries {
            let vehicles = idle.entry(*zone).or_default();
            for _ in 0..*count {
                next += 1;
                vehicles.insert(VehicleId(next));
            }
        }
        idle
    }

    #[test]
    fn rounding_policies() {
        assert_eq!(Rounding::Floor.apply(2.7), 2);
        assert_eq!(Rounding::Round.apply(2.5), 3);
        assert_eq!(Rounding::Round.apply(-1.0), 0);
        assert_eq!(Rounding::Floor.apply(f64::NAN), 0);
    }

    #[test]
    fn demand_weighted_follows_demand() {
        let (a, b) = zones();
        let idle = idle(&[(a, 5)]);
        let demand: DemandSignal = [(a, 2.0), (b, 3.0)].into_iter().collect();
        let targets = DemandWeighted {
            alpha: 1.0,
            beta: 0.0,
        }
        .calculate_targets(0, &idle, &demand);
        assert_eq!(targets.get(a), 2.0);
        assert_eq!(targets.get(b), 3.0);
    }

    #[test]
    fn covered_zones_never_exceed_their_idle_supply() {
        let (a, b) = zones();
        let idle = idle(&[(a, 4), (b, 1)]);
        let demand: DemandSignal = [(a, 2.0), (b, 1.0)].into_iter().collect();
        let strategies: [Box<dyn RebalancingTargetCalculator>; 3] = [
            TargetStrategyKind::EqualShare.build(),
            TargetStrategyKind::DemandWeighted {
                alpha: 3.0,
                beta: 2.0,
            }
            .build(),
            TargetStrategyKind::ForecastMatching {
                minimum_reserve: 5.0,
            }
            .build(),
        ];
        for strategy in strategies {
            let targets = strategy.calculate_targets(0, &idle, &demand);
            assert!(targets.get(a) <= 4.0);
            assert!(targets.get(b) <= 1.0);
        }
    }

    #[test]
    fn equal_share_splits_over_zones_with_demand() {
        let (a, b) = zones();
        let idle = idle(&[(a, 6)]);
        let demand: DemandSignal = [(a, 5.0), (b, 5.0)].into_iter().collect();
        let targets = EqualShare.calculate_targets(0, &idle, &demand);
        assert_eq!(targets.get(a), 3.0);
        assert_eq!(targets.get(b), 3.0);
    }

    #[test]
    fn forecast_matching_keeps_a_reserve() {
        let (a, b) = zones();
        let idle = idle(&[(a, 4)]);
        let demand: DemandSignal = [(b, 10.0)].into_iter().collect();
        let strategy = ForecastMatching {
            minimum_reserve: 1.0,
        };
        let targets = strategy.calculate_targets(0, &idle, &demand);
        assert_eq!(targets.get(a), 1.0);
        assert_eq!(targets.get(b), 4.0);
        assert_eq!(strategy.rounding(), Rounding::Floor);
    }

    #[test]
    fn strategies_are_deterministic() {
        let (a, b) = zones();
        let idle = idle(&[(a, 3), (b, 2)]);
        let demand: DemandSignal = [(a, 1.5), (b, 4.0)].into_iter().collect();
        let strategy = TargetStrategyKind::default().build();
        assert_eq!(
            strategy.calculate_targets(100, &idle, &demand),
            strategy.calculate_targets(100, &idle, &demand)
        );
    }
}
