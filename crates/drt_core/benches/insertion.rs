//! Insertion and rebalancing benchmarks using Criterion.rs.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use drt_core::config::{DispatchConfig, RebalancingConfig, RelocationMatching};
use drt_core::insertion::InsertionOptimizer;
use drt_core::model::Fleet;
use drt_core::rebalancing::{Rebalancer, TargetVector};
use drt_core::spatial::ZoneSystem;
use drt_core::test_helpers::{random_requests, started_fleet, test_cell, GridHopOracle};

fn loaded_fleet(vehicles: u32, requests: usize) -> Fleet {
    let disk = test_cell().grid_disk::<Vec<_>>(6);
    let layout: Vec<_> = (0..vehicles)
        .map(|i| (i + 1, 4, disk[i as usize % disk.len()]))
        .collect();
    let fleet = started_fleet(&layout, 0);
    let optimizer = InsertionOptimizer::new(
        DispatchConfig::default(),
        Arc::new(GridHopOracle { secs_per_cell: 60 }),
    );
    for request in random_requests(42, requests, 6) {
        let _ = optimizer.insert(&fleet, &request, 0);
    }
    fleet
}

fn bench_insertion(c: &mut Criterion) {
    let scenarios = vec![("small", 10, 20), ("medium", 50, 150), ("large", 200, 600)];

    let mut group = c.benchmark_group("insertion");
    for (name, vehicles, preloaded) in scenarios {
        let fleet = loaded_fleet(vehicles, preloaded);
        let optimizer = InsertionOptimizer::new(
            DispatchConfig::default(),
            Arc::new(GridHopOracle { secs_per_cell: 60 }),
        );
        let probe = random_requests(7, 1, 6).remove(0);
        group.bench_with_input(BenchmarkId::from_parameter(name), &fleet, |b, fleet| {
            b.iter(|| black_box(optimizer.best_candidate(fleet, &probe, 0)));
        });
    }
    group.finish();
}

fn bench_rebalancing_plan(c: &mut Criterion) {
    let zones = ZoneSystem::default();
    let disk = test_cell().grid_disk::<Vec<_>>(30);
    let layout: Vec<_> = (0..300u32)
        .map(|i| (i + 1, 4, disk[(i as usize * 7) % disk.len()]))
        .collect();
    let fleet = started_fleet(&layout, 0);
    let snapshots = fleet.snapshots();
    let idle = zones.idle_vehicles_by_zone(&snapshots);
    // Pull everything towards the least supplied zones.
    let mut ranked: Vec<_> = idle.iter().map(|(zone, v)| (v.len(), *zone)).collect();
    ranked.sort_unstable();
    let targets: TargetVector = ranked
        .iter()
        .enumerate()
        .map(|(rank, (count, zone))| {
            let target = if rank < ranked.len() / 2 { count + 5 } else { 0 };
            (*zone, target as f64)
        })
        .collect();

    let mut group = c.benchmark_group("rebalancing_plan");
    for matching in [RelocationMatching::Greedy, RelocationMatching::MinCost] {
        let rebalancer = Rebalancer::new(
            RebalancingConfig {
                matching,
                max_relocation_distance_km: 50.0,
                ..RebalancingConfig::default()
            },
            Arc::new(GridHopOracle { secs_per_cell: 60 }),
        );
        group.bench_function(format!("{matching:?}"), |b| {
            b.iter(|| black_box(rebalancer.plan(&zones, &snapshots, &targets, 0)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insertion, bench_rebalancing_plan);
criterion_main!(benches);
