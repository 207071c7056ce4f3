use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use h3o::CellIndex;
use pathfinding::kuhn_munkres::{kuhn_munkres, Weights};

use crate::config::{RebalancingConfig, RelocationMatching};
use crate::model::{Fleet, Task, TaskKind, TaskStatus, VehicleId, VehicleSnapshot};
use crate::oracle::TravelTimeOracle;
use crate::spatial::{distance_km_between_cells, ZoneId, ZoneSystem};
use crate::SimTime;

use super::demand::DemandSignal;
use super::targets::{RebalancingTargetCalculator, TargetVector};

/// Scale factor from kilometres to assignment weights.
const SCALE: f64 = 1_000.0;

/// Weight of pairs beyond the relocation distance (never selected).
const INFEASIBLE: i64 = -1_000_000_000_000_i64;

struct I64Weights(Vec<Vec<i64>>);

impl Weights<i64> for I64Weights {
    fn rows(&self) -> usize {
        self.0.len()
    }

    fn columns(&self) -> usize {
        self.0.first().map_or(0, |r| r.len())
    }

    fn at(&self, row: usize, col: usize) -> i64 {
        self.0[row][col]
    }

    fn neg(&self) -> Self {
        I64Weights(
            self.0
                .iter()
                .map(|r| r.iter().map(|&x| x.saturating_neg()).collect())
                .collect(),
        )
    }
}

/// A surplus vehicle paired with a deficit zone, before commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRelocation {
    pub vehicle: VehicleId,
    pub from: CellIndex,
    pub from_zone: ZoneId,
    pub to_zone: ZoneId,
    /// Straight-line distance to the destination zone's centroid.
    pub distance_km: f64,
}

/// A committed relocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub vehicle: VehicleId,
    pub from_zone: ZoneId,
    pub to_zone: ZoneId,
    pub destination: CellIndex,
    pub departure: SimTime,
    pub arrival: SimTime,
    pub distance_km: f64,
}

/// One row of the per-cycle report.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRebalancing {
    pub zone: ZoneId,
    pub target: f64,
    pub rounded_target: usize,
    pub idle: usize,
    pub relocated_in: usize,
    pub relocated_out: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalancingReport {
    pub time: SimTime,
    /// Every zone with idle supply or a target, ordered by zone id.
    pub zones: Vec<ZoneRebalancing>,
    pub relocations: Vec<Relocation>,
    /// Planned relocations dropped on an oracle failure or a concurrent change.
    pub failed: usize,
}

impl RebalancingReport {
    pub fn zone(&self, zone: ZoneId) -> Option<&ZoneRebalancing> {
        self.zones.iter().find(|row| row.zone == zone)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    vehicle: VehicleId,
    location: CellIndex,
    zone: ZoneId,
}

/// Moves idle vehicles from surplus zones to deficit zones once per cycle.
pub struct Rebalancer {
    config: RebalancingConfig,
    calculator: Box<dyn RebalancingTargetCalculator>,
    oracle: Arc<dyn TravelTimeOracle>,
}

impl Rebalancer {
    /// Rebalancer using the target strategy named in `config`.
    pub fn new(config: RebalancingConfig, oracle: Arc<dyn TravelTimeOracle>) -> Self {
        let calculator = config.target_strategy.build();
        Self {
            config,
            calculator,
            oracle,
        }
    }

    pub fn with_calculator(mut self, calculator: Box<dyn RebalancingTargetCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn config(&self) -> &RebalancingConfig {
        &self.config
    }

    pub fn calculator(&self) -> &dyn RebalancingTargetCalculator {
        self.calculator.as_ref()
    }

    /// Idle, nothing planned, and enough service time left for a relocation.
    fn is_eligible(&self, snapshot: &VehicleSnapshot, now: SimTime) -> bool {
        snapshot.schedule.is_idle()
            && snapshot
                .schedule
                .current_task()
                .is_some_and(|task| task.status == TaskStatus::Started)
            && snapshot.vehicle.remaining_service(now) >= self.config.min_service_time_remaining_secs
    }

    /// One full cycle: targets from `demand`, matching, then commits.
    pub fn run(
        &self,
        fleet: &Fleet,
        zones: &ZoneSystem,
        demand: &DemandSignal,
        now: SimTime,
    ) -> RebalancingReport {
        let snapshots = fleet.snapshots();
        let idle = zones.idle_vehicles_by_zone(&snapshots);
        let targets = self.calculator.calculate_targets(now, &idle, demand);
        self.rebalance_towards(fleet, zones, &snapshots, &targets, now)
    }

    /// Match surplus vehicles to deficit zones for the given targets.
    ///
    /// Pure: the fleet is not touched. Zones at their rounded target contribute
    /// neither vehicles nor demand for vehicles.
    pub fn plan(
        &self,
        zones: &ZoneSystem,
        snapshots: &[VehicleSnapshot],
        targets: &TargetVector,
        now: SimTime,
    ) -> Vec<PlannedRelocation> {
        let idle = zones.idle_vehicles_by_zone(snapshots);
        let rounding = self.calculator.rounding();
        let by_id: BTreeMap<VehicleId, &VehicleSnapshot> = snapshots
            .iter()
            .map(|snapshot| (snapshot.vehicle.id, snapshot))
            .collect();

        let all_zones: BTreeSet<ZoneId> = idle.keys().copied().chain(targets.zones()).collect();
        let mut candidates = Vec::new();
        let mut deficits = Vec::new();
        for zone in all_zones {
            let vehicles = idle.get(&zone);
            let count = vehicles.map_or(0, BTreeSet::len);
            let target = rounding.apply(targets.get(zone));
            if count > target {
                let surplus = vehicles
                    .into_iter()
                    .flatten()
                    .filter_map(|id| by_id.get(id))
                    .filter(|snapshot| self.is_eligible(snapshot, now))
                    .take(count - target)
                    .filter_map(|snapshot| {
                        Some(Candidate {
                            vehicle: snapshot.vehicle.id,
                            location: snapshot.schedule.current_task()?.start_location(),
                            zone,
                        })
                    });
                candidates.extend(surplus);
            } else if target > count && self.serves(zones, zone) {
                deficits.push((zone, target - count));
            }
        }
        deficits.sort_by_key(|(zone, deficit)| (Reverse(*deficit), *zone));

        let cap = self.config.max_relocations_per_cycle;
        if candidates.is_empty() || deficits.is_empty() || cap == 0 {
            return Vec::new();
        }
        // No zone can receive more vehicles than there are candidates or moves.
        let fillable = candidates.len().min(cap);
        for (_, deficit) in &mut deficits {
            *deficit = (*deficit).min(fillable);
        }
        match self.config.matching {
            RelocationMatching::Greedy => self.greedy(zones, &candidates, &deficits, cap),
            RelocationMatching::MinCost => self.min_cost(zones, &candidates, &deficits, cap),
        }
    }

    fn serves(&self, zones: &ZoneSystem, zone: ZoneId) -> bool {
        zones.service_area().is_empty() || zones.service_area().contains(&zone)
    }

    /// Largest deficits first; each slot takes the nearest unused vehicle.
    fn greedy(
        &self,
        zones: &ZoneSystem,
        candidates: &[Candidate],
        deficits: &[(ZoneId, usize)],
        cap: usize,
    ) -> Vec<PlannedRelocation> {
        let mut used = BTreeSet::new();
        let mut moves = Vec::new();
        for &(zone, deficit) in deficits {
            let centroid = zones.centroid(zone);
            for _ in 0..deficit {
                if moves.len() >= cap {
                    return moves;
                }
                let nearest = candidates
                    .iter()
                    .filter(|candidate| !used.contains(&candidate.vehicle))
                    .map(|candidate| {
                        (distance_km_between_cells(candidate.location, centroid), candidate)
                    })
                    .filter(|(distance, _)| *distance <= self.config.max_relocation_distance_km)
                    .min_by(|a, b| {
                        a.0.total_cmp(&b.0)
                            .then_with(|| a.1.vehicle.cmp(&b.1.vehicle))
                    });
                let Some((distance_km, candidate)) = nearest else {
                    break;
                };
                used.insert(candidate.vehicle);
                moves.push(PlannedRelocation {
                    vehicle: candidate.vehicle,
                    from: candidate.location,
                    from_zone: candidate.zone,
                    to_zone: zone,
                    distance_km,
                });
            }
        }
        moves
    }

    /// Minimum total distance assignment of vehicles to deficit slots.
    fn min_cost(
        &self,
        zones: &ZoneSystem,
        candidates: &[Candidate],
        deficits: &[(ZoneId, usize)],
        cap: usize,
    ) -> Vec<PlannedRelocation> {
        let slots: Vec<ZoneId> = deficits
            .iter()
            .flat_map(|&(zone, deficit)| std::iter::repeat(zone).take(deficit))
            .collect();
        let distances: Vec<Vec<f64>> = candidates
            .iter()
            .map(|candidate| {
                slots
                    .iter()
                    .map(|zone| distance_km_between_cells(candidate.location, zones.centroid(*zone)))
                    .collect()
            })
            .collect();
        let weight = |distance: f64| {
            if distance <= self.config.max_relocation_distance_km {
                -(distance * SCALE).round() as i64
            } else {
                INFEASIBLE
            }
        };

        // Kuhn-Munkres requires rows <= columns.
        let vehicles_as_rows = candidates.len() <= slots.len();
        let matrix: Vec<Vec<i64>> = if vehicles_as_rows {
            distances
                .iter()
                .map(|row| row.iter().map(|d| weight(*d)).collect())
                .collect()
        } else {
            (0..slots.len())
                .map(|slot| distances.iter().map(|row| weight(row[slot])).collect())
                .collect()
        };
        let weights = I64Weights(matrix);
        let has_feasible = (0..weights.rows())
            .any(|r| (0..weights.columns()).any(|c| weights.at(r, c) > INFEASIBLE));
        if !has_feasible {
            return Vec::new();
        }

        let (_total, assignments) = kuhn_munkres(&weights);
        let mut moves: Vec<PlannedRelocation> = assignments
            .iter()
            .enumerate()
            .filter(|&(row, &col)| weights.at(row, col) > INFEASIBLE)
            .map(|(row, &col)| {
                let (vehicle, slot) = if vehicles_as_rows { (row, col) } else { (col, row) };
                let candidate = candidates[vehicle];
                PlannedRelocation {
                    vehicle: candidate.vehicle,
                    from: candidate.location,
                    from_zone: candidate.zone,
                    to_zone: slots[slot],
                    distance_km: distances[vehicle][slot],
                }
            })
            .collect();
        moves.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.vehicle.cmp(&b.vehicle))
        });
        moves.truncate(cap);
        moves
    }

    /// Plan against `targets` and commit `[Relocate, Wait]` tails.
    ///
    /// Each commit is conditional on the snapshot version, so a vehicle that
    /// received an insertion in the meantime is left alone.
    pub fn rebalance_towards(
        &self,
        fleet: &Fleet,
        zones: &ZoneSystem,
        snapshots: &[VehicleSnapshot],
        targets: &TargetVector,
        now: SimTime,
    ) -> RebalancingReport {
        let planned = self.plan(zones, snapshots, targets, now);
        let by_id: BTreeMap<VehicleId, &VehicleSnapshot> = snapshots
            .iter()
            .map(|snapshot| (snapshot.vehicle.id, snapshot))
            .collect();

        let mut relocations = Vec::with_capacity(planned.len());
        let mut failed = 0;
        for relocation in planned {
            let Some(snapshot) = by_id.get(&relocation.vehicle) else {
                continue;
            };
            match self.commit_relocation(fleet, zones, snapshot, &relocation, now) {
                Some(done) => relocations.push(done),
                None => failed += 1,
            }
        }

        let idle = zones.idle_vehicles_by_zone(snapshots);
        let rounding = self.calculator.rounding();
        let all_zones: BTreeSet<ZoneId> = idle.keys().copied().chain(targets.zones()).collect();
        let rows = all_zones
            .into_iter()
            .map(|zone| ZoneRebalancing {
                zone,
                target: targets.get(zone),
                rounded_target: rounding.apply(targets.get(zone)),
                idle: idle.get(&zone).map_or(0, BTreeSet::len),
                relocated_in: relocations.iter().filter(|r| r.to_zone == zone).count(),
                relocated_out: relocations.iter().filter(|r| r.from_zone == zone).count(),
            })
            .collect();

        log::info!(
            "rebalancing at {now}: {} relocations, {failed} failed",
            relocations.len()
        );
        RebalancingReport {
            time: now,
            zones: rows,
            relocations,
            failed,
        }
    }

    fn commit_relocation(
        &self,
        fleet: &Fleet,
        zones: &ZoneSystem,
        snapshot: &VehicleSnapshot,
        relocation: &PlannedRelocation,
        now: SimTime,
    ) -> Option<Relocation> {
        let vehicle = &snapshot.vehicle;
        let anchor = snapshot.anchor(now)?;
        let destination = zones.centroid(relocation.to_zone);
        let estimate = match self.oracle.estimate(anchor.location, destination, anchor.time) {
            Ok(estimate) => estimate,
            Err(err) => {
                log::warn!("vehicle {}: relocation skipped, {err}", vehicle.id);
                return None;
            }
        };

        let arrival = estimate.arrival_time;
        let tail = vec![
            Task::planned(
                TaskKind::Relocate {
                    from: anchor.location,
                    to_zone: relocation.to_zone,
                    destination,
                    distance_km: estimate.distance_km,
                },
                anchor.time,
                arrival,
            ),
            Task::planned(
                TaskKind::Wait {
                    location: destination,
                    until: vehicle.service_end,
                },
                arrival,
                vehicle.service_end.max(arrival),
            ),
        ];
        fleet
            .commit_if_unchanged(vehicle.id, snapshot.schedule.version(), tail, now)
            .ok()?;
        log::debug!(
            "vehicle {}: relocating {} -> {} ({:.2} km)",
            vehicle.id,
            relocation.from_zone,
            relocation.to_zone,
            estimate.distance_km
        );
        Some(Relocation {
            vehicle: vehicle.id,
            from_zone: relocation.from_zone,
            to_zone: relocation.to_zone,
            destination,
            departure: anchor.time,
            arrival,
            distance_km: estimate.distance_km,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::model::Vehicle;
    use crate::test_helpers::{
        cell_at_distance, started_fleet, test_cell, GridHopOracle, UnavailableOracle,
    };

    fn two_zones(zones: &ZoneSystem) -> (ZoneId, ZoneId) {
        let a = zones.zone_of(test_cell());
        let b = zones.zone_of(cell_at_distance(test_cell(), 20));
        assert_ne!(a, b);
        (a, b)
    }

    fn rebalancer(config: RebalancingConfig) -> Rebalancer {
        Rebalancer::new(config, Arc::new(GridHopOracle { secs_per_cell: 30 }))
    }

    fn five_in(zones: &ZoneSystem, zone: ZoneId) -> Fleet {
        let home = zones.centroid(zone);
        let vehicles: Vec<_> = (1..=5).map(|id| (id, 4, home)).collect();
        started_fleet(&vehicles, 0)
    }

    #[rstest]
    #[case::greedy(RelocationMatching::Greedy)]
    #[case::min_cost(RelocationMatching::MinCost)]
    fn surplus_fills_deficit(#[case] matching: RelocationMatching) {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let fleet = five_in(&zones, a);
        let rebalancer = rebalancer(RebalancingConfig {
            matching,
            max_relocations_per_cycle: 10,
            ..RebalancingConfig::default()
        });
        let targets: TargetVector = [(a, 2.0), (b, 3.0)].into_iter().collect();

        let report = rebalancer.rebalance_towards(&fleet, &zones, &fleet.snapshots(), &targets, 0);
        assert_eq!(report.failed, 0);
        let moved: Vec<_> = report.relocations.iter().map(|r| r.vehicle.0).collect();
        assert_eq!(moved, [1, 2, 3]);
        assert!(report.relocations.iter().all(|r| r.to_zone == b));

        let row_a = report.zone(a).expect("row a");
        assert_eq!((row_a.idle, row_a.rounded_target, row_a.relocated_out), (5, 2, 3));
        let row_b = report.zone(b).expect("row b");
        assert_eq!((row_b.idle, row_b.rounded_target, row_b.relocated_in), (0, 3, 3));

        let idle_after = zones.idle_vehicles_by_zone(&fleet.snapshots());
        assert_eq!(idle_after.get(&a).map(BTreeSet::len), Some(2));

        let tail = fleet.planned_tail(VehicleId(1)).expect("tail");
        assert!(matches!(tail[0].kind, TaskKind::Relocate { to_zone, .. } if to_zone == b));
        assert!(tail[1].is_wait());
        assert_eq!(tail[1].end_location(), zones.centroid(b));
    }

    #[rstest]
    #[case::greedy(RelocationMatching::Greedy)]
    #[case::min_cost(RelocationMatching::MinCost)]
    fn huge_target_is_limited_by_supply(#[case] matching: RelocationMatching) {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let fleet = five_in(&zones, a);
        let rebalancer = rebalancer(RebalancingConfig {
            matching,
            max_relocations_per_cycle: 10,
            ..RebalancingConfig::default()
        });
        let targets: TargetVector = [(a, 0.0), (b, 1_000_000.0)].into_iter().collect();

        let planned = rebalancer.plan(&zones, &fleet.snapshots(), &targets, 0);
        assert_eq!(planned.len(), 5);
        assert!(planned.iter().all(|relocation| relocation.to_zone == b));
    }

    #[test]
    fn balanced_zones_need_no_relocations() {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let fleet = five_in(&zones, a);
        let before = fleet.snapshots();
        let targets: TargetVector = [(a, 5.0), (b, 0.0)].into_iter().collect();

        let report = rebalancer(RebalancingConfig::default())
            .rebalance_towards(&fleet, &zones, &before, &targets, 0);
        assert!(report.relocations.is_empty());
        assert_eq!(fleet.snapshots(), before);
    }

    #[test]
    fn relocations_respect_cycle_cap_and_distance() {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let targets: TargetVector = [(a, 0.0), (b, 5.0)].into_iter().collect();

        let fleet = five_in(&zones, a);
        let capped = rebalancer(RebalancingConfig {
            max_relocations_per_cycle: 1,
            ..RebalancingConfig::default()
        });
        assert_eq!(
            capped.plan(&zones, &fleet.snapshots(), &targets, 0).len(),
            1
        );

        let short = rebalancer(RebalancingConfig {
            max_relocation_distance_km: 0.5,
            matching: RelocationMatching::MinCost,
            ..RebalancingConfig::default()
        });
        assert!(short.plan(&zones, &fleet.snapshots(), &targets, 0).is_empty());
    }

    #[test]
    fn vehicles_near_end_of_service_stay() {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let mut fleet = Fleet::new();
        for id in 1..=3 {
            fleet
                .add_vehicle(
                    Vehicle::new(VehicleId(id), 4, zones.centroid(a)).with_service_window(0, 1_000),
                )
                .expect("add");
            fleet.task_started(VehicleId(id), 0).expect("start");
        }
        let targets: TargetVector = [(a, 0.0), (b, 3.0)].into_iter().collect();
        assert!(rebalancer(RebalancingConfig::default())
            .plan(&zones, &fleet.snapshots(), &targets, 0)
            .is_empty());
    }

    #[test]
    fn oracle_outage_counts_as_failed() {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let fleet = five_in(&zones, a);
        let before = fleet.snapshots();
        let rebalancer = Rebalancer::new(RebalancingConfig::default(), Arc::new(UnavailableOracle));
        let targets: TargetVector = [(a, 3.0), (b, 2.0)].into_iter().collect();

        let report = rebalancer.rebalance_towards(&fleet, &zones, &before, &targets, 0);
        assert_eq!(report.failed, 2);
        assert!(report.relocations.is_empty());
        assert_eq!(fleet.snapshots(), before);
    }

    #[test]
    fn stale_snapshot_skips_the_vehicle() {
        let zones = ZoneSystem::default();
        let (a, b) = two_zones(&zones);
        let fleet = five_in(&zones, a);
        let snapshots = fleet.snapshots();
        fleet.commit(VehicleId(1), Vec::new(), 0).expect("concurrent change");
        let targets: TargetVector = [(a, 4.0), (b, 1.0)].into_iter().collect();

        let report = rebalancer(RebalancingConfig::default())
            .rebalance_towards(&fleet, &zones, &snapshots, &targets, 0);
        assert_eq!(report.failed, 1);
        assert!(report.relocations.is_empty());
    }
}
