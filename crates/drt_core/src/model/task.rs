use h3o::CellIndex;

use crate::model::RequestId;
use crate::spatial::ZoneId;
use crate::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopKind {
    Pickup,
    Dropoff,
}

/// Boarding or alighting of one request.
///
/// The stop carries copies of the request's constraints so feasibility can be
/// evaluated from the schedule alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stop {
    pub request: RequestId,
    pub kind: StopKind,
    pub location: CellIndex,
    pub load: u32,
    /// Service may not begin before this time (pickups).
    pub earliest: SimTime,
    /// Service must begin by this time.
    pub latest: SimTime,
    /// Longest allowed ride, checked at the dropoff.
    pub max_ride: Option<SimTime>,
}

impl Stop {
    /// Signed change in onboard load caused by this stop.
    pub fn load_delta(&self) -> i64 {
        match self.kind {
            StopKind::Pickup => i64::from(self.load),
            StopKind::Dropoff => -i64::from(self.load),
        }
    }

    pub fn is_pickup(&self) -> bool {
        self.kind == StopKind::Pickup
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Drive {
        from: CellIndex,
        to: CellIndex,
        distance_km: f64,
    },
    Stop(Stop),
    Wait {
        location: CellIndex,
        until: SimTime,
    },
    Relocate {
        from: CellIndex,
        to_zone: ZoneId,
        destination: CellIndex,
        distance_km: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Planned,
    Started,
    Completed,
}

/// One scheduled action of a vehicle. Times are derived, never user-set.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub start_time: SimTime,
    pub end_time: SimTime,
}

impl Task {
    pub fn planned(kind: TaskKind, start_time: SimTime, end_time: SimTime) -> Self {
        Self {
            kind,
            status: TaskStatus::Planned,
            start_time,
            end_time,
        }
    }

    pub fn start_location(&self) -> CellIndex {
        match &self.kind {
            TaskKind::Drive { from, .. } | TaskKind::Relocate { from, .. } => *from,
            TaskKind::Stop(stop) => stop.location,
            TaskKind::Wait { location, .. } => *location,
        }
    }

    pub fn end_location(&self) -> CellIndex {
        match &self.kind {
            TaskKind::Drive { to, .. } => *to,
            TaskKind::Relocate { destination, .. } => *destination,
            TaskKind::Stop(stop) => stop.location,
            TaskKind::Wait { location, .. } => *location,
        }
    }

    pub fn duration(&self) -> SimTime {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn as_stop(&self) -> Option<&Stop> {
        match &self.kind {
            TaskKind::Stop(stop) => Some(stop),
            _ => None,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self.kind, TaskKind::Wait { .. })
    }
}
