mod support;

use std::collections::BTreeSet;

use drt_core::config::{
    DispatchConfig, RebalancingConfig, RelocationMatching, TargetStrategyKind,
};
use drt_core::model::{Request, RequestId, TaskKind, VehicleId};
use drt_core::rebalancing::BinnedForecast;
use drt_core::spatial::{ZoneId, ZoneSystem};
use drt_core::test_helpers::{advance_until, assert_schedule_invariants, cell_at_distance, test_cell};
use drt_core::DrtOptimizer;
use rstest::rstest;
use support::{drt_with_fleet, kinds};

fn zones() -> (ZoneSystem, ZoneId, ZoneId) {
    let system = ZoneSystem::default();
    let a = system.zone_of(test_cell());
    let b = system.zone_of(cell_at_distance(test_cell(), 20));
    assert_ne!(a, b);
    (system, a, b)
}

fn config(matching: RelocationMatching) -> RebalancingConfig {
    RebalancingConfig {
        matching,
        max_relocations_per_cycle: 10,
        max_relocation_distance_km: 25.0,
        target_strategy: TargetStrategyKind::DemandWeighted {
            alpha: 1.0,
            beta: 0.0,
        },
        ..RebalancingConfig::default()
    }
}

fn five_idle_in(zone_a: ZoneId, system: &ZoneSystem, rebalancing: RebalancingConfig) -> DrtOptimizer {
    let home = system.centroid(zone_a);
    let vehicles: Vec<_> = (1..=5).map(|id| (id, 4, home)).collect();
    drt_with_fleet(&vehicles, DispatchConfig::default(), rebalancing, 0)
}

fn idle_count(drt: &DrtOptimizer, zone: ZoneId) -> usize {
    drt.zones()
        .idle_vehicles_by_zone(&drt.fleet().snapshots())
        .get(&zone)
        .map_or(0, BTreeSet::len)
}

#[rstest]
#[case::greedy(RelocationMatching::Greedy)]
#[case::min_cost(RelocationMatching::MinCost)]
fn forecast_surplus_moves_to_deficit_and_settles(#[case] matching: RelocationMatching) {
    let (system, a, b) = zones();
    let forecast = (0..4).fold(BinnedForecast::new(1_800), |forecast, bin| {
        forecast
            .with_demand(a, bin * 1_800, 2.0)
            .with_demand(b, bin * 1_800, 3.0)
    });
    let mut drt = five_idle_in(a, &system, config(matching)).with_forecast(Box::new(forecast));

    let report = drt.rebalance(0);
    assert_eq!(report.relocations.len(), 3);
    assert_eq!(report.failed, 0);
    let row_a = report.zone(a).expect("zone a");
    assert_eq!((row_a.idle, row_a.rounded_target, row_a.relocated_out), (5, 2, 3));
    let row_b = report.zone(b).expect("zone b");
    assert_eq!((row_b.idle, row_b.rounded_target, row_b.relocated_in), (0, 3, 3));

    let moved = report.relocations[0].vehicle;
    assert_eq!(
        kinds(&drt.fleet().planned_tail(moved).expect("tail")),
        ["relocate", "wait"]
    );

    let arrival = report
        .relocations
        .iter()
        .map(|relocation| relocation.arrival)
        .max()
        .expect("relocations");
    advance_until(&mut drt, arrival).expect("drive the fleet");
    assert_eq!(idle_count(&drt, a), 2);
    assert_eq!(idle_count(&drt, b), 3);
    for snapshot in drt.fleet().snapshots() {
        assert_schedule_invariants(&snapshot);
    }

    // Balanced: the next cycle proposes nothing.
    let next = drt.rebalance(arrival);
    assert!(next.relocations.is_empty());
}

#[test]
fn observed_demand_pulls_vehicles() {
    let (system, a, b) = zones();
    let mut drt = five_idle_in(a, &system, config(RelocationMatching::Greedy));
    let origin = system.centroid(b);
    for id in 1..=2 {
        // Already expired: recorded as demand, never assigned.
        let request = Request::new(RequestId(id), origin, test_cell()).with_pickup_window(0, 0);
        drt.submit_request(request, 10).expect("submit");
    }

    let report = drt.rebalance(10);
    let targets: Vec<_> = report.relocations.iter().map(|r| r.to_zone).collect();
    assert_eq!(targets, [b, b]);
    assert_eq!(report.zone(a).map(|row| row.relocated_out), Some(2));
}

fn relocating_one_to(
    system: &ZoneSystem,
    a: ZoneId,
    b: ZoneId,
) -> (DrtOptimizer, VehicleId) {
    let forecast = BinnedForecast::new(1_800).with_demand(b, 0, 1.0);
    let mut drt = five_idle_in(a, system, config(RelocationMatching::Greedy))
        .with_forecast(Box::new(forecast));
    let report = drt.rebalance(0);
    assert_eq!(report.relocations.len(), 1);
    (drt, report.relocations[0].vehicle)
}

#[test]
fn insertion_replaces_a_planned_relocation() {
    let (system, a, b) = zones();
    let (mut drt, relocating) = relocating_one_to(&system, a, b);
    assert_eq!(relocating, VehicleId(1));

    let home = system.centroid(a);
    let request = Request::new(RequestId(1), home, cell_at_distance(home, 2));
    let outcome = drt.submit_request(request, 0).expect("submit");
    let drt_core::RequestOutcome::Assigned(assignment) = outcome else {
        panic!("expected assignment, got {outcome:?}");
    };
    assert_eq!(assignment.vehicle, relocating);
    assert_eq!(
        kinds(&drt.fleet().planned_tail(relocating).expect("tail")),
        ["pickup", "drive", "dropoff"]
    );
}

#[test]
fn insertion_diverts_an_executing_relocation() {
    let (system, a, b) = zones();
    let (mut drt, relocating) = relocating_one_to(&system, a, b);
    drt.task_ended(relocating, 0).expect("idle wait ends");
    let current = drt
        .fleet()
        .current_task(relocating)
        .expect("task")
        .expect("current");
    assert!(matches!(current.kind, TaskKind::Relocate { .. }));

    let midway = cell_at_distance(system.centroid(a), 1);
    drt.update_location(relocating, midway).expect("location");
    let request = Request::new(RequestId(1), midway, cell_at_distance(midway, 2));
    let outcome = drt.submit_request(request, 5).expect("submit");
    let drt_core::RequestOutcome::Assigned(assignment) = outcome else {
        panic!("expected assignment, got {outcome:?}");
    };
    assert_eq!(assignment.vehicle, relocating);
    assert_eq!(assignment.pickup_time, 5);
    assert_eq!(assignment.detour_cost, 60 + 2 * 60 + 60);

    let cut = drt
        .fleet()
        .current_task(relocating)
        .expect("task")
        .expect("current");
    assert!(matches!(cut.kind, TaskKind::Relocate { .. }));
    assert_eq!((cut.end_location(), cut.end_time), (midway, 5));
    assert_eq!(
        kinds(&drt.fleet().planned_tail(relocating).expect("tail")),
        ["pickup", "drive", "dropoff"]
    );
    assert_eq!(idle_count(&drt, b), 0);
    for snapshot in drt.fleet().snapshots() {
        assert_schedule_invariants(&snapshot);
    }

    advance_until(&mut drt, 1_000).expect("drive the fleet");
    assert!(matches!(
        drt.request_state(RequestId(1)),
        Some(drt_core::model::RequestState::Completed { vehicle }) if vehicle == relocating
    ));
}
