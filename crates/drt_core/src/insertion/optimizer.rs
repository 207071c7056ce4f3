use std::sync::Arc;

use rayon::prelude::*;

use crate::config::DispatchConfig;
use crate::error::{ConflictReason, DispatchError, OracleError, Rejection};
use crate::model::{Fleet, Request, RequestId, VehicleId, VehicleSnapshot};
use crate::oracle::TravelTimeOracle;
use crate::spatial::distance_km_between_cells;
use crate::SimTime;

use super::path::PathContext;
use super::search::{best_insertion, InsertionCandidate};

/// A committed insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub request: RequestId,
    pub vehicle: VehicleId,
    pub pickup_time: SimTime,
    pub dropoff_time: SimTime,
    /// Added schedule duration of the chosen vehicle (seconds).
    pub detour_cost: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionOutcome {
    Assigned(Assignment),
    Rejected(Rejection),
}

/// Least-detour insertion of requests into the fleet's schedules.
pub struct InsertionOptimizer {
    config: DispatchConfig,
    oracle: Arc<dyn TravelTimeOracle>,
}

impl InsertionOptimizer {
    pub fn new(config: DispatchConfig, oracle: Arc<dyn TravelTimeOracle>) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn context(&self, capacity: u32) -> PathContext<'_> {
        PathContext {
            oracle: self.oracle.as_ref(),
            capacity,
            stop_duration: self.config.stop_duration_secs,
        }
    }

    fn is_candidate(&self, snapshot: &VehicleSnapshot, request: &Request, now: SimTime) -> bool {
        if snapshot.vehicle.capacity < request.load || snapshot.vehicle.service_end <= now {
            return false;
        }
        match (self.config.max_candidate_distance_km, snapshot.anchor(now)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(limit), Some(anchor)) => {
                distance_km_between_cells(anchor.location, request.origin) <= limit
            }
        }
    }

    /// Cheapest feasible insertion across the fleet, without committing it.
    ///
    /// Vehicles are evaluated in parallel on snapshots; the winner is the
    /// minimum of [`InsertionCandidate::selection_key`].
    pub fn best_candidate(
        &self,
        fleet: &Fleet,
        request: &Request,
        now: SimTime,
    ) -> Result<Option<InsertionCandidate>, OracleError> {
        let snapshots: Vec<VehicleSnapshot> = fleet
            .snapshots()
            .into_iter()
            .filter(|snapshot| self.is_candidate(snapshot, request, now))
            .collect();

        let candidates = snapshots
            .par_iter()
            .map(|snapshot| {
                best_insertion(
                    &self.context(snapshot.vehicle.capacity),
                    snapshot,
                    request,
                    now,
                )
            })
            .collect::<Result<Vec<_>, OracleError>>()?;

        Ok(candidates
            .into_iter()
            .flatten()
            .min_by_key(InsertionCandidate::selection_key))
    }

    /// Insert `request` into exactly one vehicle's schedule, or reject it.
    ///
    /// Requests whose latest pickup has passed are rejected without searching.
    /// The winning tail is committed against the snapshot version it was
    /// derived from; if that vehicle moved on meanwhile the search is repeated.
    pub fn insert(
        &self,
        fleet: &Fleet,
        request: &Request,
        now: SimTime,
    ) -> Result<InsertionOutcome, DispatchError> {
        if request.is_expired(now) {
            return Ok(InsertionOutcome::Rejected(Rejection::RequestExpired));
        }
        if !request.is_well_formed() {
            log::warn!("request {}: malformed window or load, rejected", request.id);
            return Ok(InsertionOutcome::Rejected(Rejection::InfeasibleInsertion));
        }

        let attempts = self.config.max_commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            let Some(candidate) = self.best_candidate(fleet, request, now)? else {
                log::debug!("request {}: no feasible insertion", request.id);
                return Ok(InsertionOutcome::Rejected(Rejection::InfeasibleInsertion));
            };
            let tail = self
                .context(0)
                .build_tail(&candidate.anchor, &candidate.stops)?;

            match fleet.commit_if_unchanged(candidate.vehicle, candidate.version, tail, now) {
                Ok(_) => {
                    log::debug!(
                        "request {} -> vehicle {} (pickup {}, dropoff {}, detour {}s)",
                        request.id,
                        candidate.vehicle,
                        candidate.pickup_time,
                        candidate.dropoff_time,
                        candidate.cost
                    );
                    return Ok(InsertionOutcome::Assigned(Assignment {
                        request: request.id,
                        vehicle: candidate.vehicle,
                        pickup_time: candidate.pickup_time,
                        dropoff_time: candidate.dropoff_time,
                        detour_cost: candidate.cost,
                    }));
                }
                Err(err) if err.is_retryable() && attempt < attempts => attempt += 1,
                Err(err) => return Err(err),
            }
        }
    }

    /// Remove a not yet boarded request's stops from `vehicle` and re-derive
    /// the remaining tail.
    pub fn withdraw(
        &self,
        fleet: &Fleet,
        vehicle: VehicleId,
        request: RequestId,
        now: SimTime,
    ) -> Result<(), DispatchError> {
        fleet.modify(vehicle, now, |state, schedule, anchor| {
            if schedule.has_boarded(request) {
                return Err(DispatchError::conflict(
                    vehicle,
                    ConflictReason::AlreadyPickedUp { request },
                ));
            }
            let stops = schedule.planned_stops();
            if !stops.iter().any(|stop| stop.request == request) {
                return Err(DispatchError::conflict(
                    vehicle,
                    ConflictReason::RequestNotScheduled { request },
                ));
            }
            let remaining: Vec<_> = stops
                .into_iter()
                .filter(|stop| stop.request != request)
                .collect();
            Ok(self.context(state.capacity).build_tail(anchor, &remaining)?)
        })?;
        log::debug!("request {request} withdrawn from vehicle {vehicle}");
        Ok(())
    }
}
