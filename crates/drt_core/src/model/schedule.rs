use std::collections::BTreeSet;

use h3o::CellIndex;

use crate::error::ConflictReason;
use crate::model::{RequestId, Stop, StopKind, Task, TaskKind, TaskStatus, Vehicle};
use crate::SimTime;

/// Progress of a schedule through its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// Not started yet; every task is planned.
    Empty,
    /// The task at this index is executing.
    Active(usize),
    /// The vehicle left service.
    Done,
}

/// Where, when and with which passengers a new planned tail begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub location: CellIndex,
    pub time: SimTime,
    /// Seats occupied when the tail begins.
    pub load: u32,
    /// Requests aboard at the anchor and the time their pickup stop ends.
    pub onboard: Vec<(RequestId, SimTime)>,
}

/// A request whose pickup stop has completed and whose dropoff has not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boarded {
    pub request: RequestId,
    /// End of the pickup stop.
    pub departure: SimTime,
    pub load: u32,
}

/// Ordered tasks of one vehicle: the executing task followed by a mutable
/// planned tail.
///
/// Completed tasks are retired as soon as the next one starts; only the
/// passengers they left aboard are remembered.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    tasks: Vec<Task>,
    state: ScheduleState,
    version: u64,
    boarded: Vec<Boarded>,
}

impl Schedule {
    /// An unstarted schedule holding one idle wait.
    pub fn idle(location: CellIndex, start: SimTime, until: SimTime) -> Self {
        Self {
            tasks: vec![Task::planned(
                TaskKind::Wait { location, until },
                start,
                until.max(start),
            )],
            state: ScheduleState::Empty,
            version: 0,
            boarded: Vec::new(),
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Bumped by every mutation; used for compare-and-swap commits.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The executing task, if any, and the planned tail.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Passengers aboard from completed pickups.
    pub fn boarded(&self) -> &[Boarded] {
        &self.boarded
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            ScheduleState::Active(index) => Some(index),
            _ => None,
        }
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_index().and_then(|index| self.tasks.get(index))
    }

    fn tail_start(&self) -> usize {
        match self.state {
            ScheduleState::Empty => 0,
            ScheduleState::Active(index) => index + 1,
            ScheduleState::Done => self.tasks.len(),
        }
    }

    pub fn planned_tail(&self) -> &[Task] {
        &self.tasks[self.tail_start().min(self.tasks.len())..]
    }

    pub fn planned_stops(&self) -> Vec<Stop> {
        self.planned_tail()
            .iter()
            .filter_map(Task::as_stop)
            .cloned()
            .collect()
    }

    /// Executing a wait with nothing planned after it.
    pub fn is_idle(&self) -> bool {
        self.current_task().is_some_and(Task::is_wait) && self.planned_tail().is_empty()
    }

    /// The request's pickup stop has started, and its dropoff has not ended.
    pub fn has_boarded(&self, request: RequestId) -> bool {
        self.boarded.iter().any(|boarded| boarded.request == request)
            || self.current_task().and_then(Task::as_stop).is_some_and(|stop| {
                stop.request == request && stop.is_pickup()
            })
    }

    /// The executing task when it may be cut short for a new tail: a wait, or
    /// a relocation with no stops planned after it.
    fn divertible_task(&self) -> Option<&Task> {
        let current = self.current_task()?;
        match current.kind {
            TaskKind::Wait { .. } => Some(current),
            TaskKind::Relocate { .. }
                if current.status == TaskStatus::Started
                    && self.planned_tail().iter().all(|task| task.as_stop().is_none()) =>
            {
                Some(current)
            }
            _ => None,
        }
    }

    /// Last end time of the planned stops, or `None` when no stop is planned.
    pub fn last_stop_end(&self) -> Option<SimTime> {
        self.planned_tail()
            .iter()
            .rev()
            .find(|task| task.as_stop().is_some())
            .map(|task| task.end_time)
    }

    /// Starting point for a new planned tail at `now`.
    ///
    /// An executing wait is cut short, so the tail may start at `now` where the
    /// vehicle waits. A relocation under way is cut short at the vehicle's last
    /// reported location. Any other executing task is finished first.
    pub fn anchor(&self, vehicle: &Vehicle, now: SimTime) -> Option<Anchor> {
        let (location, time) = match self.state {
            ScheduleState::Done => return None,
            ScheduleState::Empty => {
                let location = self
                    .tasks
                    .first()
                    .map(Task::start_location)
                    .unwrap_or(vehicle.location);
                (location, now.max(vehicle.service_start))
            }
            ScheduleState::Active(index) => {
                let current = &self.tasks[index];
                match (&current.kind, self.divertible_task()) {
                    (TaskKind::Wait { .. }, _) => {
                        (current.start_location(), now.max(current.start_time))
                    }
                    (TaskKind::Relocate { .. }, Some(_)) => {
                        (vehicle.location, now.max(current.start_time))
                    }
                    _ => (current.end_location(), now.max(current.end_time)),
                }
            }
        };

        let mut onboard: Vec<(RequestId, SimTime, u32)> = self
            .boarded
            .iter()
            .map(|boarded| (boarded.request, boarded.departure, boarded.load))
            .collect();
        if let Some((stop_task, stop)) = self
            .current_task()
            .and_then(|task| task.as_stop().map(|stop| (task, stop)))
        {
            match stop.kind {
                StopKind::Pickup => onboard.push((stop.request, stop_task.end_time, stop.load)),
                StopKind::Dropoff => onboard.retain(|(request, _, _)| *request != stop.request),
            }
        }

        Some(Anchor {
            location,
            time,
            load: onboard.iter().map(|(_, _, load)| load).sum(),
            onboard: onboard
                .into_iter()
                .map(|(request, departure, _)| (request, departure))
                .collect(),
        })
    }

    /// Check a replacement tail against ordering, chaining and load invariants.
    pub fn check_tail(
        &self,
        vehicle: &Vehicle,
        anchor: &Anchor,
        tail: &[Task],
    ) -> Result<(), ConflictReason> {
        if self.state == ScheduleState::Done {
            return Err(ConflictReason::ScheduleDone);
        }

        let mut previous: Option<&Task> = None;
        for (index, task) in tail.iter().enumerate() {
            if task.status != TaskStatus::Planned {
                return Err(ConflictReason::TaskNotPlanned { index });
            }
            if task.end_time < task.start_time {
                return Err(ConflictReason::NegativeDuration { index });
            }
            match previous {
                None => {
                    if task.start_location() != anchor.location {
                        return Err(ConflictReason::BrokenChain { index });
                    }
                    if task.start_time < anchor.time {
                        return Err(ConflictReason::StartsBeforeAnchor {
                            start: task.start_time,
                            anchor: anchor.time,
                        });
                    }
                }
                Some(prev) => {
                    if task.start_location() != prev.end_location() {
                        return Err(ConflictReason::BrokenChain { index });
                    }
                    if task.start_time < prev.end_time {
                        return Err(ConflictReason::TimeOverlap { index });
                    }
                }
            }
            previous = Some(task);
        }

        let mut aboard: BTreeSet<RequestId> =
            anchor.onboard.iter().map(|(request, _)| *request).collect();
        let mut picked_up: BTreeSet<RequestId> = BTreeSet::new();
        let mut dropped_off: BTreeSet<RequestId> = BTreeSet::new();
        let mut load = anchor.load;
        for (index, task) in tail.iter().enumerate() {
            let Some(stop) = task.as_stop() else {
                continue;
            };
            match stop.kind {
                StopKind::Pickup => {
                    if aboard.contains(&stop.request) || !picked_up.insert(stop.request) {
                        return Err(ConflictReason::DuplicateStop {
                            request: stop.request,
                        });
                    }
                    aboard.insert(stop.request);
                    load = load.saturating_add(stop.load);
                    if load > vehicle.capacity {
                        return Err(ConflictReason::CapacityExceeded {
                            index,
                            load,
                            capacity: vehicle.capacity,
                        });
                    }
                }
                StopKind::Dropoff => {
                    if !dropped_off.insert(stop.request) {
                        return Err(ConflictReason::DuplicateStop {
                            request: stop.request,
                        });
                    }
                    if !aboard.remove(&stop.request) {
                        return Err(ConflictReason::DropoffBeforePickup {
                            request: stop.request,
                        });
                    }
                    load = load.checked_sub(stop.load).ok_or(
                        ConflictReason::DropoffBeforePickup {
                            request: stop.request,
                        },
                    )?;
                }
            }
        }
        if let Some(request) = aboard.first() {
            return Err(ConflictReason::MissingDropoff { request: *request });
        }
        Ok(())
    }

    /// Swap in a tail that passed [`Schedule::check_tail`].
    ///
    /// An executing wait ends where the new tail starts, or becomes an idle wait
    /// until the end of service when the tail is empty. A divertible relocation
    /// ends at the anchor.
    pub(crate) fn replace_tail(&mut self, vehicle: &Vehicle, anchor: &Anchor, tail: Vec<Task>) {
        let next_start = tail.first().map(|task| task.start_time);
        let divert = self.divertible_task().is_some();
        match self.state {
            ScheduleState::Done => return,
            ScheduleState::Empty => {
                self.tasks = tail;
                if self.tasks.is_empty() {
                    self.tasks.push(Task::planned(
                        TaskKind::Wait {
                            location: anchor.location,
                            until: vehicle.service_end,
                        },
                        anchor.time,
                        vehicle.service_end.max(anchor.time),
                    ));
                }
            }
            ScheduleState::Active(index) => {
                self.tasks.truncate(index + 1);
                let current = &mut self.tasks[index];
                match &mut current.kind {
                    TaskKind::Wait { until, .. } => {
                        let end = next_start.unwrap_or(vehicle.service_end);
                        *until = end;
                        current.end_time = end.max(current.start_time);
                    }
                    TaskKind::Relocate { destination, .. } if divert => {
                        *destination = anchor.location;
                        current.end_time = anchor.time.max(current.start_time);
                    }
                    _ => {}
                }
                self.tasks.extend(tail);
            }
        }
        self.version += 1;
    }

    /// Move tasks from `index` on so the first starts at `time`, keeping each
    /// task's duration; waits still end no earlier than their `until`, and
    /// planned pickups still begin no earlier than their window opens.
    fn retime_from(&mut self, index: usize, mut time: SimTime) {
        for task in &mut self.tasks[index..] {
            let duration = task.duration();
            let start = match &task.kind {
                TaskKind::Stop(stop) if stop.is_pickup() && task.status == TaskStatus::Planned => {
                    time.max(stop.earliest)
                }
                _ => time,
            };
            task.start_time = start;
            task.end_time = match task.kind {
                TaskKind::Wait { until, .. } => until.max(start),
                _ => start.saturating_add(duration),
            };
            time = task.end_time;
        }
    }

    /// Put a wait in front of the pickup at `index` if the vehicle would reach
    /// it at `time`, before its window opens.
    fn hold_for_pickup(&mut self, index: usize, time: SimTime) {
        let Some(stop) = self.tasks.get(index).and_then(Task::as_stop) else {
            return;
        };
        if !stop.is_pickup() || stop.earliest <= time {
            return;
        }
        let wait = Task::planned(
            TaskKind::Wait {
                location: stop.location,
                until: stop.earliest,
            },
            time,
            stop.earliest,
        );
        self.tasks.insert(index, wait);
    }

    fn record_boarding(&mut self, ended: &Task) {
        let Some(stop) = ended.as_stop() else {
            return;
        };
        match stop.kind {
            StopKind::Pickup => self.boarded.push(Boarded {
                request: stop.request,
                departure: ended.end_time,
                load: stop.load,
            }),
            StopKind::Dropoff => self.boarded.retain(|boarded| boarded.request != stop.request),
        }
    }

    /// Start the schedule, or re-anchor the executing task at `now`.
    pub(crate) fn start(&mut self, now: SimTime) -> Result<(), ConflictReason> {
        match self.state {
            ScheduleState::Done => return Err(ConflictReason::ScheduleDone),
            ScheduleState::Empty => {
                if self.tasks.is_empty() {
                    return Err(ConflictReason::NoCurrentTask);
                }
                self.hold_for_pickup(0, now);
                self.tasks[0].status = TaskStatus::Started;
                self.state = ScheduleState::Active(0);
                self.retime_from(0, now);
            }
            ScheduleState::Active(index) => self.retime_from(index, now),
        }
        self.version += 1;
        Ok(())
    }

    /// Complete the executing task at `now` and start the next one.
    ///
    /// A pickup reached before its window opens is preceded by a wait. With
    /// nothing planned, an idle wait until the end of service is appended; past
    /// the end of service the schedule is done. The completed task is retired
    /// and returned.
    pub(crate) fn end_current(
        &mut self,
        vehicle: &Vehicle,
        now: SimTime,
    ) -> Result<Task, ConflictReason> {
        let index = match self.state {
            ScheduleState::Active(index) => index,
            ScheduleState::Empty => return Err(ConflictReason::NoCurrentTask),
            ScheduleState::Done => return Err(ConflictReason::ScheduleDone),
        };

        let current = &mut self.tasks[index];
        current.end_time = now.max(current.start_time);
        current.status = TaskStatus::Completed;
        let ended = current.clone();
        let end = ended.end_time;
        self.record_boarding(&ended);

        let next = index + 1;
        if next < self.tasks.len() {
            self.hold_for_pickup(next, end);
            self.retime_from(next, end);
            self.tasks[next].status = TaskStatus::Started;
            self.tasks = self.tasks.split_off(next);
            self.state = ScheduleState::Active(0);
        } else if end < vehicle.service_end {
            self.tasks.clear();
            self.tasks.push(Task {
                kind: TaskKind::Wait {
                    location: ended.end_location(),
                    until: vehicle.service_end,
                },
                status: TaskStatus::Started,
                start_time: end,
                end_time: vehicle.service_end,
            });
            self.state = ScheduleState::Active(0);
        } else {
            self.tasks.clear();
            self.state = ScheduleState::Done;
        }
        self.version += 1;
        Ok(ended)
    }
}
