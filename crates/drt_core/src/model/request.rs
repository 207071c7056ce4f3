use std::collections::BTreeMap;
use std::fmt;

use h3o::CellIndex;
use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::model::{Stop, StopKind, VehicleId};
use crate::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A point-to-point transport request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub origin: CellIndex,
    pub destination: CellIndex,
    pub earliest_pickup: SimTime,
    pub latest_pickup: SimTime,
    /// Longest allowed time between leaving the pickup and reaching the dropoff.
    pub max_ride: SimTime,
    /// Seats occupied.
    pub load: u32,
}

impl Request {
    /// A single-seat request with an open pickup window and no ride limit.
    pub fn new(id: RequestId, origin: CellIndex, destination: CellIndex) -> Self {
        Self {
            id,
            origin,
            destination,
            earliest_pickup: 0,
            latest_pickup: SimTime::MAX,
            max_ride: SimTime::MAX,
            load: 1,
        }
    }

    pub fn with_pickup_window(mut self, earliest: SimTime, latest: SimTime) -> Self {
        self.earliest_pickup = earliest;
        self.latest_pickup = latest;
        self
    }

    pub fn with_max_ride(mut self, max_ride: SimTime) -> Self {
        self.max_ride = max_ride;
        self
    }

    pub fn with_load(mut self, load: u32) -> Self {
        self.load = load;
        self
    }

    /// The latest pickup time has passed.
    pub fn is_expired(&self, now: SimTime) -> bool {
        now > self.latest_pickup
    }

    /// A non-empty window and a positive load.
    pub fn is_well_formed(&self) -> bool {
        self.load > 0 && self.earliest_pickup <= self.latest_pickup
    }

    pub fn pickup_stop(&self) -> Stop {
        Stop {
            request: self.id,
            kind: StopKind::Pickup,
            location: self.origin,
            load: self.load,
            earliest: self.earliest_pickup,
            latest: self.latest_pickup,
            max_ride: None,
        }
    }

    pub fn dropoff_stop(&self) -> Stop {
        Stop {
            request: self.id,
            kind: StopKind::Dropoff,
            location: self.destination,
            load: self.load,
            earliest: 0,
            latest: SimTime::MAX,
            max_ride: Some(self.max_ride),
        }
    }
}

/// Lifecycle of a request inside the dispatch core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Unassigned,
    Assigned {
        vehicle: VehicleId,
        pickup_time: SimTime,
        dropoff_time: SimTime,
    },
    PickedUp {
        vehicle: VehicleId,
    },
    Completed {
        vehicle: VehicleId,
    },
    Rejected(Rejection),
    Withdrawn,
}

impl RequestState {
    /// No further transitions are possible.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Rejected(_) | Self::Withdrawn
        )
    }

    /// Vehicle whose schedule currently holds the request's stops.
    pub fn vehicle(&self) -> Option<VehicleId> {
        match self {
            Self::Assigned { vehicle, .. }
            | Self::PickedUp { vehicle }
            | Self::Completed { vehicle } => Some(*vehicle),
            _ => None,
        }
    }
}

/// Live requests with their current state, plus the final states of requests
/// that left the system and have not been collected yet.
#[derive(Debug, Default)]
pub struct RequestBook {
    entries: BTreeMap<RequestId, (Request, RequestState)>,
    finished: BTreeMap<RequestId, RequestState>,
}

impl RequestBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request as `Unassigned`. Returns `false` for an id that is
    /// live or finished and not yet drained.
    pub fn insert(&mut self, request: Request) -> bool {
        if self.entries.contains_key(&request.id) || self.finished.contains_key(&request.id) {
            return false;
        }
        self.entries
            .insert(request.id, (request, RequestState::Unassigned));
        true
    }

    /// A live request.
    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.entries.get(&id).map(|(request, _)| request)
    }

    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.entries
            .get(&id)
            .map(|(_, state)| *state)
            .or_else(|| self.finished.get(&id).copied())
    }

    /// Update a live request. A final state retires the request from the live
    /// entries.
    pub fn set_state(&mut self, id: RequestId, state: RequestState) {
        if state.is_final() {
            if self.entries.remove(&id).is_some() {
                self.finished.insert(id, state);
            }
        } else if let Some(entry) = self.entries.get_mut(&id) {
            entry.1 = state;
        }
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live requests in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&Request, RequestState)> {
        self.entries.values().map(|(request, state)| (request, *state))
    }

    /// Final states not drained yet, in id order.
    pub fn finished(&self) -> impl Iterator<Item = (RequestId, RequestState)> + '_ {
        self.finished.iter().map(|(id, state)| (*id, *state))
    }

    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }

    /// Hand over and forget every finished request. Their ids become free.
    pub fn drain_finished(&mut self) -> Vec<(RequestId, RequestState)> {
        std::mem::take(&mut self.finished).into_iter().collect()
    }
}
