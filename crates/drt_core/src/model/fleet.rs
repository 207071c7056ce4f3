use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bevy_ecs::prelude::Resource;
use h3o::CellIndex;

use crate::error::{ConflictReason, DispatchError};
use crate::model::{Anchor, Schedule, Task, Vehicle, VehicleId};
use crate::SimTime;

/// Read-only copy of one vehicle and its schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub vehicle: Vehicle,
    pub schedule: Schedule,
}

impl VehicleSnapshot {
    pub fn anchor(&self, now: SimTime) -> Option<Anchor> {
        self.schedule.anchor(&self.vehicle, now)
    }
}

/// A task boundary crossed by a `task_ended` event.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub vehicle: VehicleId,
    pub ended: Task,
    /// Task now executing, `None` once the schedule is done.
    pub started: Option<Task>,
}

#[derive(Debug)]
struct VehicleSlot {
    vehicle: Vehicle,
    schedule: Schedule,
}

impl VehicleSlot {
    fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            vehicle: self.vehicle.clone(),
            schedule: self.schedule.clone(),
        }
    }

    fn apply(&mut self, tail: Vec<Task>, now: SimTime) -> Result<u64, ConflictReason> {
        let anchor = self
            .schedule
            .anchor(&self.vehicle, now)
            .ok_or(ConflictReason::ScheduleDone)?;
        self.schedule.check_tail(&self.vehicle, &anchor, &tail)?;
        self.schedule.replace_tail(&self.vehicle, &anchor, tail);
        Ok(self.schedule.version())
    }
}

/// All vehicles and their schedules.
///
/// Each vehicle sits behind its own lock: snapshots, commits and task events
/// hold exactly one vehicle at a time, so insertion and rebalancing can run
/// from different threads without racing on the same schedule.
#[derive(Debug, Default, Resource)]
pub struct Fleet {
    slots: BTreeMap<VehicleId, Mutex<VehicleSlot>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vehicle with an unstarted idle schedule at its location.
    pub fn add_vehicle(&mut self, vehicle: Vehicle) -> Result<(), DispatchError> {
        if self.slots.contains_key(&vehicle.id) {
            return Err(DispatchError::DuplicateVehicle(vehicle.id));
        }
        let schedule = Schedule::idle(vehicle.location, vehicle.service_start, vehicle.service_end);
        self.slots
            .insert(vehicle.id, Mutex::new(VehicleSlot { vehicle, schedule }));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.slots.keys().copied()
    }

    fn slot(&self, id: VehicleId) -> Result<MutexGuard<'_, VehicleSlot>, DispatchError> {
        let slot = self.slots.get(&id).ok_or(DispatchError::UnknownVehicle(id))?;
        Ok(slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn snapshot(&self, id: VehicleId) -> Result<VehicleSnapshot, DispatchError> {
        Ok(self.slot(id)?.snapshot())
    }

    /// Snapshots of every vehicle, ordered by id.
    pub fn snapshots(&self) -> Vec<VehicleSnapshot> {
        self.slots
            .values()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).snapshot())
            .collect()
    }

    pub fn current_task(&self, id: VehicleId) -> Result<Option<Task>, DispatchError> {
        Ok(self.slot(id)?.schedule.current_task().cloned())
    }

    pub fn planned_tail(&self, id: VehicleId) -> Result<Vec<Task>, DispatchError> {
        Ok(self.slot(id)?.schedule.planned_tail().to_vec())
    }

    /// Atomically replace the planned tail. All or nothing.
    pub fn commit(&self, id: VehicleId, tail: Vec<Task>, now: SimTime) -> Result<u64, DispatchError> {
        let mut slot = self.slot(id)?;
        slot.apply(tail, now).map_err(|reason| conflict(id, reason))
    }

    /// [`Fleet::commit`] that also refuses when the schedule moved past the
    /// version a decision was based on.
    pub fn commit_if_unchanged(
        &self,
        id: VehicleId,
        expected_version: u64,
        tail: Vec<Task>,
        now: SimTime,
    ) -> Result<u64, DispatchError> {
        let mut slot = self.slot(id)?;
        let actual = slot.schedule.version();
        if actual != expected_version {
            return Err(conflict(
                id,
                ConflictReason::StaleSnapshot {
                    expected: expected_version,
                    actual,
                },
            ));
        }
        slot.apply(tail, now).map_err(|reason| conflict(id, reason))
    }

    /// Derive and commit a new tail while holding the vehicle's lock.
    pub fn modify<F>(&self, id: VehicleId, now: SimTime, derive: F) -> Result<u64, DispatchError>
    where
        F: FnOnce(&Vehicle, &Schedule, &Anchor) -> Result<Vec<Task>, DispatchError>,
    {
        let mut slot = self.slot(id)?;
        let anchor = slot
            .schedule
            .anchor(&slot.vehicle, now)
            .ok_or_else(|| conflict(id, ConflictReason::ScheduleDone))?;
        let tail = derive(&slot.vehicle, &slot.schedule, &anchor)?;
        slot.apply(tail, now).map_err(|reason| conflict(id, reason))
    }

    pub fn task_started(&self, id: VehicleId, now: SimTime) -> Result<(), DispatchError> {
        let mut slot = self.slot(id)?;
        slot.schedule
            .start(now)
            .map_err(|reason| conflict(id, reason))
    }

    pub fn task_ended(&self, id: VehicleId, now: SimTime) -> Result<TaskTransition, DispatchError> {
        let mut guard = self.slot(id)?;
        let slot = &mut *guard;
        let ended = slot
            .schedule
            .end_current(&slot.vehicle, now)
            .map_err(|reason| conflict(id, reason))?;
        slot.vehicle.location = ended.end_location();
        Ok(TaskTransition {
            vehicle: id,
            ended,
            started: slot.schedule.current_task().cloned(),
        })
    }

    /// Vehicle state feed: last known position.
    pub fn update_location(&self, id: VehicleId, location: CellIndex) -> Result<(), DispatchError> {
        self.slot(id)?.vehicle.location = location;
        Ok(())
    }
}

fn conflict(vehicle: VehicleId, reason: ConflictReason) -> DispatchError {
    match &reason {
        ConflictReason::StaleSnapshot { .. } => {
            log::debug!("vehicle {vehicle}: commit skipped, {reason}");
        }
        _ => log::warn!("vehicle {vehicle}: schedule mutation rejected, {reason}"),
    }
    DispatchError::conflict(vehicle, reason)
}
