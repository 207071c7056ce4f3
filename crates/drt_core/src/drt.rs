//! The dispatch facade driven by the host simulation.
//!
//! [`DrtOptimizer`] owns the fleet, the request book and the rebalancing
//! state. The host calls it once per event: request submissions and
//! withdrawals, task boundaries reported by the mobility simulation, retry
//! ticks and rebalancing cycles.

use std::sync::Arc;

use bevy_ecs::prelude::Resource;
use h3o::CellIndex;

use crate::config::{DispatchConfig, RebalancingConfig};
use crate::error::{ConflictReason, DispatchError, Rejection};
use crate::insertion::{Assignment, InsertionOptimizer, InsertionOutcome, UnplannedRequests};
use crate::model::{
    Fleet, Request, RequestBook, RequestId, RequestState, StopKind, Task, TaskTransition, Vehicle,
    VehicleId,
};
use crate::oracle::TravelTimeOracle;
use crate::rebalancing::{
    DemandForecast, DemandObserver, DemandSignal, RebalancingReport, RebalancingTargetCalculator,
    Rebalancer,
};
use crate::spatial::ZoneSystem;
use crate::SimTime;

/// What happened to a submitted or retried request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Assigned(Assignment),
    Rejected(Rejection),
    /// Not placed yet; kept for a retry until its latest pickup passes.
    Queued,
}

#[derive(Resource)]
pub struct DrtOptimizer {
    fleet: Fleet,
    requests: RequestBook,
    unplanned: UnplannedRequests,
    demand: DemandObserver,
    forecast: Option<Box<dyn DemandForecast>>,
    zones: ZoneSystem,
    insertion: InsertionOptimizer,
    rebalancer: Rebalancer,
    last_rebalancing: Option<SimTime>,
}

impl DrtOptimizer {
    pub fn new(
        dispatch: DispatchConfig,
        rebalancing: RebalancingConfig,
        zones: ZoneSystem,
        oracle: Arc<dyn TravelTimeOracle>,
    ) -> Self {
        Self {
            fleet: Fleet::new(),
            requests: RequestBook::new(),
            unplanned: UnplannedRequests::new(),
            demand: DemandObserver::new(rebalancing.demand_window_secs),
            forecast: None,
            zones,
            insertion: InsertionOptimizer::new(dispatch, Arc::clone(&oracle)),
            rebalancer: Rebalancer::new(rebalancing, oracle),
            last_rebalancing: None,
        }
    }

    /// Use a forecast instead of observed demand for rebalancing targets.
    pub fn with_forecast(mut self, forecast: Box<dyn DemandForecast>) -> Self {
        self.forecast = Some(forecast);
        self
    }

    pub fn with_target_calculator(
        mut self,
        calculator: Box<dyn RebalancingTargetCalculator>,
    ) -> Self {
        self.rebalancer = self.rebalancer.with_calculator(calculator);
        self
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn requests(&self) -> &RequestBook {
        &self.requests
    }

    pub fn request_state(&self, id: RequestId) -> Option<RequestState> {
        self.requests.state(id)
    }

    /// Hand the final states of completed, rejected and withdrawn requests to
    /// the host and forget them.
    pub fn drain_finished_requests(&mut self) -> Vec<(RequestId, RequestState)> {
        self.requests.drain_finished()
    }

    pub fn demand_observer(&self) -> &DemandObserver {
        &self.demand
    }

    pub fn unplanned(&self) -> &UnplannedRequests {
        &self.unplanned
    }

    pub fn zones(&self) -> &ZoneSystem {
        &self.zones
    }

    pub fn insertion(&self) -> &InsertionOptimizer {
        &self.insertion
    }

    pub fn rebalancer(&self) -> &Rebalancer {
        &self.rebalancer
    }

    /// Add a vehicle and retry queued requests against the larger fleet.
    ///
    /// The vehicle's idle schedule starts with the host's first `task_started`.
    pub fn add_vehicle(&mut self, vehicle: Vehicle, now: SimTime) -> Result<(), DispatchError> {
        log::debug!("vehicle {} joins at {}", vehicle.id, vehicle.location);
        self.fleet.add_vehicle(vehicle)?;
        self.retry_unplanned(now);
        Ok(())
    }

    /// Try to place a new request.
    ///
    /// An oracle failure keeps the request queued for the next retry and is
    /// returned as a retryable error.
    pub fn submit_request(
        &mut self,
        request: Request,
        now: SimTime,
    ) -> Result<RequestOutcome, DispatchError> {
        if !self.requests.insert(request.clone()) {
            return Err(DispatchError::DuplicateRequest(request.id));
        }
        self.demand.record(now, self.zones.zone_of(request.origin));
        self.demand.prune(now);
        self.place(request, now, true)
    }

    fn place(
        &mut self,
        request: Request,
        now: SimTime,
        first_attempt: bool,
    ) -> Result<RequestOutcome, DispatchError> {
        match self.insertion.insert(&self.fleet, &request, now) {
            Ok(InsertionOutcome::Assigned(assignment)) => {
                self.requests.set_state(
                    request.id,
                    RequestState::Assigned {
                        vehicle: assignment.vehicle,
                        pickup_time: assignment.pickup_time,
                        dropoff_time: assignment.dropoff_time,
                    },
                );
                Ok(RequestOutcome::Assigned(assignment))
            }
            Ok(InsertionOutcome::Rejected(Rejection::InfeasibleInsertion))
                if self.insertion.config().retry_unplanned =>
            {
                if first_attempt {
                    log::debug!("request {}: queued for retry", request.id);
                }
                self.unplanned.push(request);
                Ok(RequestOutcome::Queued)
            }
            Ok(InsertionOutcome::Rejected(rejection)) => {
                log::info!("request {} rejected: {rejection}", request.id);
                self.requests
                    .set_state(request.id, RequestState::Rejected(rejection));
                Ok(RequestOutcome::Rejected(rejection))
            }
            Err(err) => {
                log::warn!("request {}: insertion aborted, {err}", request.id);
                self.unplanned.push(request);
                Err(err)
            }
        }
    }

    /// Retry every queued request in arrival order.
    ///
    /// Expired entries are finalized without a search. Returns the requests
    /// whose state changed.
    pub fn retry_unplanned(&mut self, now: SimTime) -> Vec<(RequestId, RequestOutcome)> {
        let (live, expired) = self.unplanned.drain(now);
        let mut changed = Vec::new();
        for request in expired {
            log::info!("request {} expired unplanned", request.id);
            self.requests.set_state(
                request.id,
                RequestState::Rejected(Rejection::RequestExpired),
            );
            changed.push((request.id, RequestOutcome::Rejected(Rejection::RequestExpired)));
        }
        for request in live {
            let id = request.id;
            match self.place(request, now, false) {
                Ok(RequestOutcome::Queued) | Err(_) => {}
                Ok(outcome) => changed.push((id, outcome)),
            }
        }
        changed
    }

    /// Cancel a request before pickup.
    ///
    /// Its stops leave the holding schedule and the remaining tail is
    /// re-derived. Withdrawing an already final request is a no-op.
    pub fn withdraw_request(&mut self, id: RequestId, now: SimTime) -> Result<(), DispatchError> {
        let state = self
            .requests
            .state(id)
            .ok_or(DispatchError::UnknownRequest(id))?;
        match state {
            RequestState::Unassigned => {
                self.unplanned.remove(id);
            }
            RequestState::Assigned { vehicle, .. } => {
                self.insertion.withdraw(&self.fleet, vehicle, id, now)?;
            }
            RequestState::PickedUp { vehicle } => {
                return Err(DispatchError::conflict(
                    vehicle,
                    ConflictReason::AlreadyPickedUp { request: id },
                ));
            }
            RequestState::Completed { .. }
            | RequestState::Rejected(_)
            | RequestState::Withdrawn => return Ok(()),
        }
        log::debug!("request {id} withdrawn");
        self.requests.set_state(id, RequestState::Withdrawn);
        Ok(())
    }

    /// The vehicle started its schedule or reports its current task (re)started.
    pub fn task_started(&mut self, vehicle: VehicleId, now: SimTime) -> Result<(), DispatchError> {
        self.fleet.task_started(vehicle, now)?;
        if let Some(task) = self.fleet.current_task(vehicle)? {
            self.track_boarding(vehicle, &task);
        }
        Ok(())
    }

    /// The vehicle finished its current task; the next one starts at `now`.
    ///
    /// Request states follow completed stops, and queued requests are retried
    /// against the changed schedule.
    pub fn task_ended(
        &mut self,
        vehicle: VehicleId,
        now: SimTime,
    ) -> Result<TaskTransition, DispatchError> {
        let transition = self.fleet.task_ended(vehicle, now)?;
        if let Some(stop) = transition.ended.as_stop() {
            if stop.kind == StopKind::Dropoff {
                self.requests
                    .set_state(stop.request, RequestState::Completed { vehicle });
            }
        }
        if let Some(started) = &transition.started {
            self.track_boarding(vehicle, started);
        }
        if !self.unplanned.is_empty() {
            self.retry_unplanned(now);
        }
        Ok(transition)
    }

    fn track_boarding(&mut self, vehicle: VehicleId, task: &Task) {
        if let Some(stop) = task.as_stop().filter(|stop| stop.is_pickup()) {
            self.requests
                .set_state(stop.request, RequestState::PickedUp { vehicle });
        }
    }

    pub fn update_location(
        &mut self,
        vehicle: VehicleId,
        location: CellIndex,
    ) -> Result<(), DispatchError> {
        self.fleet.update_location(vehicle, location)
    }

    /// Demand signal for a cycle starting at `now`: the forecast over the next
    /// interval if one is configured, otherwise the observed window.
    pub fn demand_signal(&mut self, now: SimTime) -> DemandSignal {
        match &self.forecast {
            Some(forecast) => {
                let horizon = now.saturating_add(self.rebalancer.config().interval_secs);
                forecast.expected_demand(now, horizon)
            }
            None => {
                self.demand.prune(now);
                self.demand.signal(now)
            }
        }
    }

    pub fn rebalancing_due(&self, now: SimTime) -> bool {
        self.last_rebalancing.map_or(true, |last| {
            now >= last.saturating_add(self.rebalancer.config().interval_secs)
        })
    }

    /// Run one rebalancing cycle.
    pub fn rebalance(&mut self, now: SimTime) -> RebalancingReport {
        let demand = self.demand_signal(now);
        let report = self.rebalancer.run(&self.fleet, &self.zones, &demand, now);
        self.last_rebalancing = Some(now);
        report
    }
}
