//! `bevy_ecs` glue for hosts that run as an ECS world.
//!
//! The host inserts [`DrtOptimizer`] and [`DispatchOutbox`] as resources, sets
//! [`CurrentDispatchEvent`] for each event and runs [`dispatch_schedule`].
//! Systems are conditionally executed based on the event kind; results and
//! faults are collected in the outbox for the host to drain.

use bevy_ecs::prelude::{Res, ResMut, Resource, Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;
use h3o::CellIndex;

use crate::drt::{DrtOptimizer, RequestOutcome};
use crate::error::DispatchError;
use crate::model::{Request, RequestId, RequestState, VehicleId};
use crate::rebalancing::RebalancingReport;
use crate::SimTime;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEventKind {
    RequestSubmitted(Request),
    RequestWithdrawn(RequestId),
    TaskStarted(VehicleId),
    TaskEnded(VehicleId),
    LocationUpdated(VehicleId, CellIndex),
    /// Periodic retry of queued requests.
    RetryTick,
    RebalancingRun,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub time: SimTime,
    pub kind: DispatchEventKind,
}

/// The event being processed by the current schedule run.
#[derive(Debug, Clone, Resource)]
pub struct CurrentDispatchEvent(pub DispatchEvent);

#[derive(Debug, Default, Resource)]
pub struct DispatchOutbox {
    pub outcomes: Vec<(RequestId, RequestOutcome)>,
    pub reports: Vec<RebalancingReport>,
    pub errors: Vec<DispatchError>,
    /// Requests that reached a final state, drained from the optimizer.
    pub finished: Vec<(RequestId, RequestState)>,
}

impl DispatchOutbox {
    fn record_error(&mut self, time: SimTime, result: Result<(), DispatchError>) {
        if let Err(err) = result {
            log::warn!("dispatch event at {time} failed: {err}");
            self.errors.push(err);
        }
    }
}

fn is_request_submitted(event: Option<Res<CurrentDispatchEvent>>) -> bool {
    event
        .map(|e| matches!(e.0.kind, DispatchEventKind::RequestSubmitted(_)))
        .unwrap_or(false)
}

fn is_request_withdrawn(event: Option<Res<CurrentDispatchEvent>>) -> bool {
    event
        .map(|e| matches!(e.0.kind, DispatchEventKind::RequestWithdrawn(_)))
        .unwrap_or(false)
}

fn is_vehicle_event(event: Option<Res<CurrentDispatchEvent>>) -> bool {
    event
        .map(|e| {
            matches!(
                e.0.kind,
                DispatchEventKind::TaskStarted(_)
                    | DispatchEventKind::TaskEnded(_)
                    | DispatchEventKind::LocationUpdated(..)
            )
        })
        .unwrap_or(false)
}

fn is_retry_tick(event: Option<Res<CurrentDispatchEvent>>) -> bool {
    event
        .map(|e| e.0.kind == DispatchEventKind::RetryTick)
        .unwrap_or(false)
}

fn is_rebalancing_run(event: Option<Res<CurrentDispatchEvent>>) -> bool {
    event
        .map(|e| e.0.kind == DispatchEventKind::RebalancingRun)
        .unwrap_or(false)
}

pub fn request_submitted_system(
    event: Res<CurrentDispatchEvent>,
    mut drt: ResMut<DrtOptimizer>,
    mut outbox: ResMut<DispatchOutbox>,
) {
    let DispatchEventKind::RequestSubmitted(request) = &event.0.kind else {
        return;
    };
    match drt.submit_request(request.clone(), event.0.time) {
        Ok(outcome) => outbox.outcomes.push((request.id, outcome)),
        Err(err) => outbox.record_error(event.0.time, Err(err)),
    }
}

pub fn request_withdrawn_system(
    event: Res<CurrentDispatchEvent>,
    mut drt: ResMut<DrtOptimizer>,
    mut outbox: ResMut<DispatchOutbox>,
) {
    let DispatchEventKind::RequestWithdrawn(id) = event.0.kind else {
        return;
    };
    let result = drt.withdraw_request(id, event.0.time);
    outbox.record_error(event.0.time, result);
}

pub fn vehicle_event_system(
    event: Res<CurrentDispatchEvent>,
    mut drt: ResMut<DrtOptimizer>,
    mut outbox: ResMut<DispatchOutbox>,
) {
    let now = event.0.time;
    let result = match event.0.kind {
        DispatchEventKind::TaskStarted(vehicle) => drt.task_started(vehicle, now),
        DispatchEventKind::TaskEnded(vehicle) => drt.task_ended(vehicle, now).map(|_| ()),
        DispatchEventKind::LocationUpdated(vehicle, location) => {
            drt.update_location(vehicle, location)
        }
        _ => return,
    };
    outbox.record_error(now, result);
}

pub fn retry_tick_system(
    event: Res<CurrentDispatchEvent>,
    mut drt: ResMut<DrtOptimizer>,
    mut outbox: ResMut<DispatchOutbox>,
) {
    let changed = drt.retry_unplanned(event.0.time);
    outbox.outcomes.extend(changed);
}

pub fn rebalancing_system(
    event: Res<CurrentDispatchEvent>,
    mut drt: ResMut<DrtOptimizer>,
    mut outbox: ResMut<DispatchOutbox>,
) {
    let now = event.0.time;
    if !drt.rebalancing_due(now) {
        log::debug!("rebalancing at {now} skipped, interval not elapsed");
        return;
    }
    let report = drt.rebalance(now);
    outbox.reports.push(report);
}

/// Moves final request states out of the optimizer after every event.
pub fn retire_finished_system(mut drt: ResMut<DrtOptimizer>, mut outbox: ResMut<DispatchOutbox>) {
    let finished = drt.drain_finished_requests();
    outbox.finished.extend(finished);
}

/// All dispatch systems, each gated on its event kind, followed by request
/// retirement.
pub fn dispatch_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems(
        (
            request_submitted_system.run_if(is_request_submitted),
            request_withdrawn_system.run_if(is_request_withdrawn),
            vehicle_event_system.run_if(is_vehicle_event),
            retry_tick_system.run_if(is_retry_tick),
            rebalancing_system.run_if(is_rebalancing_run),
            retire_finished_system,
        )
            .chain(),
    );
    schedule
}

/// Route one event into the world and run the schedule for it.
pub fn deliver(world: &mut World, schedule: &mut Schedule, event: DispatchEvent) {
    world.insert_resource(CurrentDispatchEvent(event));
    schedule.run(world);
}
