mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use drt_core::config::{DispatchConfig, RebalancingConfig};
use drt_core::insertion::{InsertionOptimizer, InsertionOutcome};
use drt_core::model::{Request, RequestId, StopKind, VehicleId};
use drt_core::rebalancing::{Rebalancer, TargetVector};
use drt_core::spatial::ZoneSystem;
use drt_core::test_helpers::{
    assert_schedule_invariants, cell_at_distance, started_fleet, test_cell,
};
use support::oracle;

#[test]
fn parallel_insertions_never_double_book() {
    let vehicles: Vec<_> = (1..=6)
        .map(|id| (id, 3, cell_at_distance(test_cell(), id % 3)))
        .collect();
    let fleet = started_fleet(&vehicles, 0);
    let optimizer = InsertionOptimizer::new(
        DispatchConfig {
            max_commit_attempts: 50,
            ..DispatchConfig::default()
        },
        oracle(),
    );

    let outcomes: Vec<(RequestId, InsertionOutcome)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let fleet = &fleet;
                let optimizer = &optimizer;
                scope.spawn(move || {
                    (0..8u64)
                        .map(|i| {
                            let id = RequestId(worker * 100 + i);
                            let request = Request::new(
                                id,
                                cell_at_distance(test_cell(), (i % 4) as u32),
                                cell_at_distance(test_cell(), 2 + (worker % 3) as u32),
                            );
                            let outcome = optimizer.insert(fleet, &request, 0).expect("insert");
                            (id, outcome)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("worker"))
            .collect()
    });

    let mut holders: BTreeMap<RequestId, Vec<VehicleId>> = BTreeMap::new();
    for snapshot in fleet.snapshots() {
        assert_schedule_invariants(&snapshot);
        for task in snapshot.schedule.tasks() {
            if let Some(stop) = task.as_stop().filter(|stop| stop.kind == StopKind::Pickup) {
                holders.entry(stop.request).or_default().push(snapshot.vehicle.id);
            }
        }
    }

    assert_eq!(outcomes.len(), 32);
    for (id, outcome) in outcomes {
        let InsertionOutcome::Assigned(assignment) = outcome else {
            panic!("request {id} not assigned: {outcome:?}");
        };
        assert_eq!(holders.get(&id), Some(&vec![assignment.vehicle]));
    }
}

#[test]
fn rebalancing_and_insertion_race_on_one_vehicle() {
    let zones = ZoneSystem::default();
    let home = zones.centroid(zones.zone_of(test_cell()));
    let away = zones.zone_of(cell_at_distance(test_cell(), 20));
    let fleet = started_fleet(&[(1, 4, home)], 0);
    let optimizer = InsertionOptimizer::new(DispatchConfig::default(), oracle());
    let rebalancer = Rebalancer::new(
        RebalancingConfig {
            max_relocation_distance_km: 25.0,
            ..RebalancingConfig::default()
        },
        Arc::new(drt_core::test_helpers::GridHopOracle { secs_per_cell: 60 }),
    );
    let targets: TargetVector = [(zones.zone_of(home), 0.0), (away, 1.0)]
        .into_iter()
        .collect();

    // Both decisions are taken on the same snapshot; only one commit lands.
    let snapshots = fleet.snapshots();
    let request = Request::new(RequestId(1), home, cell_at_distance(home, 2));
    let assigned = optimizer.insert(&fleet, &request, 0).expect("insert");
    assert!(matches!(assigned, InsertionOutcome::Assigned(_)));
    let report = rebalancer.rebalance_towards(&fleet, &zones, &snapshots, &targets, 0);

    assert!(report.relocations.is_empty());
    assert_eq!(report.failed, 1);
    let snapshot = fleet.snapshot(VehicleId(1)).expect("snapshot");
    assert!(snapshot
        .schedule
        .planned_stops()
        .iter()
        .any(|stop| stop.request == RequestId(1)));
    assert_schedule_invariants(&snapshot);
}
