//! Test helpers for common test setup and utilities.
//!
//! Shared by unit tests, integration tests and benches: fixed cells, simple
//! oracles, fleets already in service, random request streams and schedule
//! invariant checks.

use h3o::{CellIndex, Resolution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drt::DrtOptimizer;
use crate::error::{DispatchError, OracleError};
use crate::model::{Fleet, Request, RequestId, Vehicle, VehicleId, VehicleSnapshot};
use crate::oracle::{TravelEstimate, TravelTimeOracle};
use crate::spatial::distance_km_between_cells;
use crate::SimTime;

/// A valid H3 cell in the San Francisco Bay Area.
pub const TEST_CELL: u64 = 0x8a1fb46622dffff;

/// The test cell at the default location resolution (9).
///
/// # Panics
///
/// Panics if the test cell constant is invalid (should never happen).
pub fn test_cell() -> CellIndex {
    CellIndex::try_from(TEST_CELL)
        .expect("TEST_CELL should be a valid H3 cell")
        .parent(Resolution::Nine)
        .expect("TEST_CELL is finer than resolution 9")
}

/// A deterministic cell exactly `k` grid steps from `origin`.
///
/// # Panics
///
/// Panics if the ring is empty (pentagon distortion; not the case near the
/// test cell).
pub fn cell_at_distance(origin: CellIndex, k: u32) -> CellIndex {
    origin
        .grid_disk::<Vec<_>>(k)
        .into_iter()
        .filter(|cell| origin.grid_distance(*cell).ok() == Some(k as i32))
        .min()
        .expect("grid ring should not be empty")
}

/// Travel time proportional to grid distance; straight-line distance in km.
#[derive(Debug, Clone, Copy)]
pub struct GridHopOracle {
    pub secs_per_cell: SimTime,
}

impl TravelTimeOracle for GridHopOracle {
    fn estimate(
        &self,
        origin: CellIndex,
        destination: CellIndex,
        departure: SimTime,
    ) -> Result<TravelEstimate, OracleError> {
        let hops = origin
            .grid_distance(destination)
            .map_err(|_| OracleError::NoRoute {
                from: origin,
                to: destination,
            })?;
        Ok(TravelEstimate {
            arrival_time: departure + u64::from(hops.unsigned_abs()) * self.secs_per_cell,
            distance_km: distance_km_between_cells(origin, destination),
        })
    }
}

/// Oracle that never answers.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableOracle;

impl TravelTimeOracle for UnavailableOracle {
    fn estimate(
        &self,
        _origin: CellIndex,
        _destination: CellIndex,
        _departure: SimTime,
    ) -> Result<TravelEstimate, OracleError> {
        Err(OracleError::Unavailable("connection refused".into()))
    }
}

/// Fleet of `(id, capacity, location)` vehicles whose idle waits started at `now`.
pub fn started_fleet(vehicles: &[(u32, u32, CellIndex)], now: SimTime) -> Fleet {
    let mut fleet = Fleet::new();
    for &(id, capacity, location) in vehicles {
        fleet
            .add_vehicle(Vehicle::new(VehicleId(id), capacity, location))
            .expect("vehicle ids should be unique");
        fleet
            .task_started(VehicleId(id), now)
            .expect("new vehicle should start");
    }
    fleet
}

/// `count` requests within `radius` grid steps of the test cell, one every
/// 30 seconds, reproducible for a given seed.
pub fn random_requests(seed: u64, count: usize, radius: u32) -> Vec<Request> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cells = test_cell().grid_disk::<Vec<_>>(radius);
    cells.sort_unstable();
    (0..count)
        .map(|i| {
            let origin = cells[rng.gen_range(0..cells.len())];
            let destination = cells[rng.gen_range(0..cells.len())];
            let earliest = i as SimTime * 30;
            let slack = rng.gen_range(300..=900);
            Request::new(RequestId(i as u64 + 1), origin, destination)
                .with_pickup_window(earliest, earliest + slack)
                .with_max_ride(1_800)
                .with_load(rng.gen_range(1..=2))
        })
        .collect()
}

/// Assert the schedule invariants: tasks chained in space, ordered in time,
/// and onboard load within capacity throughout.
///
/// # Panics
///
/// Panics with a description of the first violation.
pub fn assert_schedule_invariants(snapshot: &VehicleSnapshot) {
    let id = snapshot.vehicle.id;
    let tasks = snapshot.schedule.tasks();
    for (i, pair) in tasks.windows(2).enumerate() {
        assert!(
            pair[0].end_time <= pair[1].start_time,
            "vehicle {id}: task {i} ends at {} after task {} starts at {}",
            pair[0].end_time,
            i + 1,
            pair[1].start_time
        );
        assert_eq!(
            pair[0].end_location(),
            pair[1].start_location(),
            "vehicle {id}: task {} does not start where task {i} ends",
            i + 1
        );
    }
    let mut load: i64 = snapshot
        .schedule
        .boarded()
        .iter()
        .map(|boarded| i64::from(boarded.load))
        .sum();
    for (i, task) in tasks.iter().enumerate() {
        assert!(task.start_time <= task.end_time, "vehicle {id}: task {i} runs backwards");
        if let Some(stop) = task.as_stop() {
            load += stop.load_delta();
            assert!(
                (0..=i64::from(snapshot.vehicle.capacity)).contains(&load),
                "vehicle {id}: load {load} out of bounds at task {i}"
            );
        }
    }
}

/// Play the host: end every current task that finishes by `until`, earliest
/// first (ties by vehicle id). Returns the number of task ends delivered.
pub fn advance_until(drt: &mut DrtOptimizer, until: SimTime) -> Result<usize, DispatchError> {
    let mut steps = 0;
    loop {
        let next = drt
            .fleet()
            .snapshots()
            .iter()
            .filter_map(|snapshot| {
                let task = snapshot.schedule.current_task()?;
                Some((task.end_time, snapshot.vehicle.id))
            })
            .filter(|(end, _)| *end <= until)
            .min();
        let Some((time, vehicle)) = next else {
            return Ok(steps);
        };
        drt.task_ended(vehicle, time)?;
        steps += 1;
    }
}
