use crate::error::OracleError;
use crate::model::{Anchor, Request, Stop, VehicleId, VehicleSnapshot};
use crate::SimTime;

use super::path::{PathContext, PathState};

/// Best feasible insertion of one request into one vehicle's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionCandidate {
    pub vehicle: VehicleId,
    /// Schedule version the candidate was derived from.
    pub version: u64,
    pub anchor: Anchor,
    /// Position of the pickup among the existing stops.
    pub pickup_index: usize,
    /// Position of the dropoff among the existing stops, counted before the
    /// pickup was inserted; never smaller than `pickup_index`.
    pub dropoff_index: usize,
    pub pickup_time: SimTime,
    pub dropoff_time: SimTime,
    /// Added schedule duration.
    pub cost: SimTime,
    /// Full stop sequence after insertion.
    pub stops: Vec<Stop>,
}

impl InsertionCandidate {
    /// Total order used to pick a winner independently of evaluation order.
    pub fn selection_key(&self) -> (SimTime, VehicleId, SimTime, usize, usize) {
        (
            self.cost,
            self.vehicle,
            self.pickup_time,
            self.pickup_index,
            self.dropoff_index,
        )
    }
}

/// Enumerate every pickup/dropoff position pair in the vehicle's planned stops
/// and return the cheapest feasible one.
///
/// The existing stops keep their relative order. Path states after each
/// unchanged prefix are computed once; the pickup loop stops as soon as the
/// vehicle would leave the prefix after the request's latest pickup.
pub fn best_insertion(
    ctx: &PathContext<'_>,
    snapshot: &VehicleSnapshot,
    request: &Request,
    now: SimTime,
) -> Result<Option<InsertionCandidate>, OracleError> {
    let Some(anchor) = snapshot.anchor(now) else {
        return Ok(None);
    };
    let stops = snapshot.schedule.planned_stops();
    let n = stops.len();

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(PathState::from_anchor(&anchor));
    for stop in &stops {
        let Some(last) = prefix.last() else {
            break;
        };
        match ctx.visit(last, stop)? {
            Some((next, _)) => prefix.push(next),
            None => {
                log::debug!(
                    "vehicle {}: planned stops infeasible from anchor at {}, skipped",
                    snapshot.vehicle.id,
                    anchor.time
                );
                return Ok(None);
            }
        }
    }
    let original_end = prefix[n].time;

    let pickup = request.pickup_stop();
    let dropoff = request.dropoff_stop();
    let mut best: Option<(SimTime, SimTime, usize, usize, SimTime)> = None;

    for p in 0..=n {
        let before = &prefix[p];
        if before.time > request.latest_pickup {
            break;
        }
        let Some((mut state, pickup_visit)) = ctx.visit(before, &pickup)? else {
            continue;
        };
        if pickup_visit.begin > snapshot.vehicle.service_end {
            continue;
        }

        for d in p..=n {
            if let Some((after_dropoff, dropoff_visit)) = ctx.visit(&state, &dropoff)? {
                if let Some(end) = ctx.finish(&after_dropoff, &stops[d..])? {
                    let cost = end.time.saturating_sub(original_end);
                    let key = (cost, pickup_visit.begin, p, d, dropoff_visit.arrival);
                    if best.map_or(true, |current| key < current) {
                        best = Some(key);
                    }
                }
            }
            if d == n {
                break;
            }
            match ctx.visit(&state, &stops[d])? {
                Some((next, _)) => state = next,
                None => break,
            }
        }
    }

    Ok(best.map(|(cost, pickup_time, p, d, dropoff_time)| {
        let mut sequence = Vec::with_capacity(n + 2);
        sequence.extend_from_slice(&stops[..p]);
        sequence.push(pickup.clone());
        sequence.extend_from_slice(&stops[p..d]);
        sequence.push(dropoff.clone());
        sequence.extend_from_slice(&stops[d..]);
        InsertionCandidate {
            vehicle: snapshot.vehicle.id,
            version: snapshot.schedule.version(),
            anchor,
            pickup_index: p,
            dropoff_index: d,
            pickup_time,
            dropoff_time,
            cost,
            stops: sequence,
        }
    }))
}
