use std::fmt;

use h3o::CellIndex;
use serde::{Deserialize, Serialize};

use crate::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A fleet vehicle. Its schedule lives next to it in the fleet slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: VehicleId,
    /// Seats available for passengers.
    pub capacity: u32,
    /// Last location reported by the mobility simulation.
    pub location: CellIndex,
    pub service_start: SimTime,
    pub service_end: SimTime,
}

impl Vehicle {
    /// A vehicle in service for the whole simulation.
    pub fn new(id: VehicleId, capacity: u32, location: CellIndex) -> Self {
        Self {
            id,
            capacity,
            location,
            service_start: 0,
            service_end: SimTime::MAX,
        }
    }

    pub fn with_service_window(mut self, start: SimTime, end: SimTime) -> Self {
        self.service_start = start;
        self.service_end = end.max(start);
        self
    }

    pub fn remaining_service(&self, now: SimTime) -> SimTime {
        self.service_end.saturating_sub(now)
    }
}
