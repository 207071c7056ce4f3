use h3o::CellIndex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{RequestId, VehicleId};
use crate::SimTime;

/// Expected outcomes of a request that could not be served.
///
/// These are domain results surfaced to the caller, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum Rejection {
    /// No vehicle satisfies the time windows and capacity of the request.
    #[error("no vehicle can serve the request within its constraints")]
    InfeasibleInsertion,
    /// The latest pickup time elapsed before the request could be placed.
    #[error("latest pickup time has elapsed")]
    RequestExpired,
}

/// Failures of the travel-time collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("no route from {from} to {to}")]
    NoRoute { from: CellIndex, to: CellIndex },
    #[error("travel-time service unavailable: {0}")]
    Unavailable(String),
}

/// Why a schedule mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("schedule is done")]
    ScheduleDone,
    #[error("schedule changed since snapshot (expected version {expected}, found {actual})")]
    StaleSnapshot { expected: u64, actual: u64 },
    #[error("tail task {index} is not in planned state")]
    TaskNotPlanned { index: usize },
    #[error("tail task {index} ends before it starts")]
    NegativeDuration { index: usize },
    #[error("tail starts at {start}, before the anchor time {anchor}")]
    StartsBeforeAnchor { start: SimTime, anchor: SimTime },
    #[error("tail task {index} does not start where the previous task ends")]
    BrokenChain { index: usize },
    #[error("tail task {index} starts before the previous task ends")]
    TimeOverlap { index: usize },
    #[error("onboard load {load} exceeds capacity {capacity} at tail task {index}")]
    CapacityExceeded {
        index: usize,
        load: u32,
        capacity: u32,
    },
    #[error("dropoff of request {request} has no preceding pickup")]
    DropoffBeforePickup { request: RequestId },
    #[error("request {request} has no dropoff after its pickup")]
    MissingDropoff { request: RequestId },
    #[error("request {request} appears more than once")]
    DuplicateStop { request: RequestId },
    #[error("request {request} is already picked up")]
    AlreadyPickedUp { request: RequestId },
    #[error("request {request} is not in the planned tail")]
    RequestNotScheduled { request: RequestId },
    #[error("no task is currently executing")]
    NoCurrentTask,
}

/// Faults raised by the dispatch core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// An attempted mutation violated the schedule invariants; nothing changed.
    #[error("schedule conflict on vehicle {vehicle}: {reason}")]
    ScheduleConflict {
        vehicle: VehicleId,
        reason: ConflictReason,
    },
    /// The travel-time oracle failed; the attempt was discarded.
    #[error("travel-time oracle unavailable: {0}")]
    OracleUnavailable(#[from] OracleError),
    #[error("unknown vehicle {0}")]
    UnknownVehicle(VehicleId),
    #[error("vehicle {0} is already part of the fleet")]
    DuplicateVehicle(VehicleId),
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
    #[error("request {0} was already submitted")]
    DuplicateRequest(RequestId),
}

impl DispatchError {
    pub(crate) fn conflict(vehicle: VehicleId, reason: ConflictReason) -> Self {
        Self::ScheduleConflict { vehicle, reason }
    }

    /// Whether the same operation may succeed on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable(_)
                | Self::ScheduleConflict {
                    reason: ConflictReason::StaleSnapshot { .. },
                    ..
                }
        )
    }
}
