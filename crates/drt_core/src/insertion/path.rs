use h3o::CellIndex;

use crate::error::OracleError;
use crate::model::{Anchor, RequestId, Stop, StopKind, Task, TaskKind};
use crate::oracle::{TravelEstimate, TravelTimeOracle};
use crate::SimTime;

/// Vehicle state between two stops of a candidate path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathState {
    pub location: CellIndex,
    /// Departure time from `location`.
    pub time: SimTime,
    pub load: u32,
    /// Requests aboard with the departure time of their pickup stop.
    aboard: Vec<(RequestId, SimTime)>,
}

impl PathState {
    pub fn from_anchor(anchor: &Anchor) -> Self {
        Self {
            location: anchor.location,
            time: anchor.time,
            load: anchor.load,
            aboard: anchor.onboard.clone(),
        }
    }

    fn pickup_departure(&self, request: RequestId) -> Option<SimTime> {
        self.aboard
            .iter()
            .find(|(id, _)| *id == request)
            .map(|(_, departure)| *departure)
    }
}

/// Timing of one served stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit {
    pub arrival: SimTime,
    /// Service start; later than `arrival` when waiting for the pickup window.
    pub begin: SimTime,
    pub departure: SimTime,
}

/// Everything path evaluation needs besides the stops.
pub struct PathContext<'a> {
    pub oracle: &'a dyn TravelTimeOracle,
    pub capacity: u32,
    pub stop_duration: SimTime,
}

impl PathContext<'_> {
    fn travel(
        &self,
        from: CellIndex,
        to: CellIndex,
        departure: SimTime,
    ) -> Result<TravelEstimate, OracleError> {
        if from == to {
            return Ok(TravelEstimate {
                arrival_time: departure,
                distance_km: 0.0,
            });
        }
        self.oracle.estimate(from, to, departure)
    }

    /// Serve `stop` after `state`.
    ///
    /// `Ok(None)` when the stop's window, the ride-time limit or the capacity
    /// is violated.
    pub fn visit(
        &self,
        state: &PathState,
        stop: &Stop,
    ) -> Result<Option<(PathState, Visit)>, OracleError> {
        let arrival = self
            .travel(state.location, stop.location, state.time)?
            .arrival_time;
        let begin = match stop.kind {
            StopKind::Pickup => arrival.max(stop.earliest),
            StopKind::Dropoff => arrival,
        };
        if begin > stop.latest {
            return Ok(None);
        }
        let departure = begin.saturating_add(self.stop_duration);

        let mut aboard = state.aboard.clone();
        let load = match stop.kind {
            StopKind::Pickup => {
                let load = state.load.saturating_add(stop.load);
                if load > self.capacity {
                    return Ok(None);
                }
                aboard.push((stop.request, departure));
                load
            }
            StopKind::Dropoff => {
                let Some(picked_up) = state.pickup_departure(stop.request) else {
                    return Ok(None);
                };
                if let Some(max_ride) = stop.max_ride {
                    if arrival.saturating_sub(picked_up) > max_ride {
                        return Ok(None);
                    }
                }
                aboard.retain(|(id, _)| *id != stop.request);
                match state.load.checked_sub(stop.load) {
                    Some(load) => load,
                    None => return Ok(None),
                }
            }
        };

        Ok(Some((
            PathState {
                location: stop.location,
                time: departure,
                load,
                aboard,
            },
            Visit {
                arrival,
                begin,
                departure,
            },
        )))
    }

    /// Serve every stop in order; `Ok(None)` at the first infeasible one.
    pub fn finish<'s>(
        &self,
        state: &PathState,
        stops: impl IntoIterator<Item = &'s Stop>,
    ) -> Result<Option<PathState>, OracleError> {
        let mut state = state.clone();
        for stop in stops {
            match self.visit(&state, stop)? {
                Some((next, _)) => state = next,
                None => return Ok(None),
            }
        }
        Ok(Some(state))
    }

    /// Task list serving `stops` from `anchor`, without feasibility checks.
    ///
    /// Drives connect stops at different locations; a wait precedes a pickup
    /// reached before its window opens.
    pub fn build_tail(&self, anchor: &Anchor, stops: &[Stop]) -> Result<Vec<Task>, OracleError> {
        let mut tasks = Vec::with_capacity(stops.len() * 2);
        let mut location = anchor.location;
        let mut time = anchor.time;
        for stop in stops {
            if stop.location != location {
                let estimate = self.oracle.estimate(location, stop.location, time)?;
                tasks.push(Task::planned(
                    TaskKind::Drive {
                        from: location,
                        to: stop.location,
                        distance_km: estimate.distance_km,
                    },
                    time,
                    estimate.arrival_time,
                ));
                time = estimate.arrival_time;
                location = stop.location;
            }
            if stop.is_pickup() && time < stop.earliest {
                tasks.push(Task::planned(
                    TaskKind::Wait {
                        location,
                        until: stop.earliest,
                    },
                    time,
                    stop.earliest,
                ));
                time = stop.earliest;
            }
            let departure = time.saturating_add(self.stop_duration);
            tasks.push(Task::planned(TaskKind::Stop(stop.clone()), time, departure));
            time = departure;
        }
        Ok(tasks)
    }
}
