#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use drt_core::config::{DispatchConfig, RebalancingConfig};
use drt_core::error::OracleError;
use drt_core::model::{Task, TaskKind, Vehicle, VehicleId};
use drt_core::oracle::{TravelEstimate, TravelTimeOracle};
use drt_core::spatial::ZoneSystem;
use drt_core::test_helpers::GridHopOracle;
use drt_core::{DrtOptimizer, SimTime};
use h3o::CellIndex;

/// Seconds per grid step used by every integration test.
pub const SECS_PER_CELL: SimTime = 60;

pub fn oracle() -> Arc<dyn TravelTimeOracle> {
    Arc::new(GridHopOracle {
        secs_per_cell: SECS_PER_CELL,
    })
}

/// Facade with `(id, capacity, location)` vehicles already in service at `now`.
pub fn drt_with_fleet(
    vehicles: &[(u32, u32, CellIndex)],
    dispatch: DispatchConfig,
    rebalancing: RebalancingConfig,
    now: SimTime,
) -> DrtOptimizer {
    let mut drt = DrtOptimizer::new(dispatch, rebalancing, ZoneSystem::default(), oracle());
    for &(id, capacity, location) in vehicles {
        drt.add_vehicle(Vehicle::new(VehicleId(id), capacity, location), now)
            .expect("add vehicle");
        drt.task_started(VehicleId(id), now).expect("start vehicle");
    }
    drt
}

/// Short names of task kinds, for comparing schedule shapes.
pub fn kinds(tasks: &[Task]) -> Vec<&'static str> {
    tasks
        .iter()
        .map(|task| match &task.kind {
            TaskKind::Drive { .. } => "drive",
            TaskKind::Stop(stop) if stop.is_pickup() => "pickup",
            TaskKind::Stop(_) => "dropoff",
            TaskKind::Wait { .. } => "wait",
            TaskKind::Relocate { .. } => "relocate",
        })
        .collect()
}

/// Oracle wrapper that counts queries.
pub struct CountingOracle<O> {
    inner: O,
    calls: AtomicUsize,
}

impl<O> CountingOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<O: TravelTimeOracle> TravelTimeOracle for CountingOracle<O> {
    fn estimate(
        &self,
        origin: CellIndex,
        destination: CellIndex,
        departure: SimTime,
    ) -> Result<TravelEstimate, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.estimate(origin, destination, departure)
    }
}
