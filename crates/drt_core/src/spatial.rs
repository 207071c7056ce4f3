//! Spatial operations: H3 zone partition and distance calculations.
//!
//! This module provides:
//!
//! - **ZoneId**: an H3 cell at the zone resolution
//! - **ZoneSystem**: location → zone lookup, zone centroids and the idle-vehicle
//!   aggregation used by rebalancing
//! - **Distance calculations**: cached Haversine distance between H3 cells
//!
//! Zones default to resolution 7 (~5 km² cells) over locations at resolution 9
//! (~0.1 km² cells), suitable for city-scale fleets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use bevy_ecs::prelude::Resource;
use h3o::{CellIndex, Resolution};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::model::{TaskKind, TaskStatus, VehicleId, VehicleSnapshot};

/// Identifier of a zone: the H3 cell covering it at the zone resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u64", try_from = "u64")]
pub struct ZoneId(CellIndex);

impl ZoneId {
    pub fn new(cell: CellIndex) -> Self {
        Self(cell)
    }

    pub fn cell(self) -> CellIndex {
        self.0
    }
}

impl From<ZoneId> for u64 {
    fn from(zone: ZoneId) -> Self {
        u64::from(zone.0)
    }
}

impl TryFrom<u64> for ZoneId {
    type Error = h3o::error::InvalidCellIndex;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        CellIndex::try_from(value).map(Self)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idle vehicles grouped by the zone they stand in.
pub type IdleVehiclesByZone = BTreeMap<ZoneId, BTreeSet<VehicleId>>;

/// Static partition of the service area into H3 cells.
#[derive(Debug, Clone, Resource)]
pub struct ZoneSystem {
    zone_resolution: Resolution,
    location_resolution: Resolution,
    service_area: BTreeSet<ZoneId>,
}

impl ZoneSystem {
    pub fn new(zone_resolution: Resolution, location_resolution: Resolution) -> Self {
        Self {
            zone_resolution,
            location_resolution,
            service_area: BTreeSet::new(),
        }
    }

    /// Restrict target computation to an explicit set of zones.
    ///
    /// Locations outside the area still map to a zone.
    pub fn with_service_area(mut self, zones: impl IntoIterator<Item = ZoneId>) -> Self {
        self.service_area = zones.into_iter().collect();
        self
    }

    pub fn zone_resolution(&self) -> Resolution {
        self.zone_resolution
    }

    pub fn service_area(&self) -> &BTreeSet<ZoneId> {
        &self.service_area
    }

    /// Zone containing `location`. Total: coarser cells map to their center child.
    pub fn zone_of(&self, location: CellIndex) -> ZoneId {
        let location_res = u8::from(location.resolution());
        let zone_res = u8::from(self.zone_resolution);
        let cell = if location_res > zone_res {
            location.parent(self.zone_resolution)
        } else if location_res < zone_res {
            location.center_child(self.zone_resolution)
        } else {
            Some(location)
        };
        ZoneId(cell.unwrap_or(location))
    }

    /// Entry point of a zone: its center cell at the location resolution.
    pub fn centroid(&self, zone: ZoneId) -> CellIndex {
        zone.0
            .center_child(self.location_resolution)
            .unwrap_or(zone.0)
    }

    /// Vehicles counted as idle supply, by zone.
    ///
    /// A vehicle is idle when it executes a `Wait` with nothing planned after it,
    /// or when it executes a `Relocate` without stops planned after it and has
    /// already reported a location inside the destination zone.
    pub fn idle_vehicles_by_zone(&self, fleet: &[VehicleSnapshot]) -> IdleVehiclesByZone {
        let mut idle = IdleVehiclesByZone::new();
        for snapshot in fleet {
            let Some(current) = snapshot.schedule.current_task() else {
                continue;
            };
            let zone = match &current.kind {
                TaskKind::Wait { location, .. }
                    if snapshot.schedule.planned_tail().is_empty() =>
                {
                    Some(self.zone_of(*location))
                }
                TaskKind::Relocate { to_zone, .. }
                    if current.status == TaskStatus::Started
                        && self.zone_of(snapshot.vehicle.location) == *to_zone
                        && snapshot
                            .schedule
                            .planned_tail()
                            .iter()
                            .all(|task| task.as_stop().is_none()) =>
                {
                    Some(*to_zone)
                }
                _ => None,
            };
            if let Some(zone) = zone {
                idle.entry(zone).or_default().insert(snapshot.vehicle.id);
            }
        }
        idle
    }
}

impl Default for ZoneSystem {
    fn default() -> Self {
        Self::new(Resolution::Seven, Resolution::Nine)
    }
}

/// Uncached distance calculation (internal use).
fn distance_km_between_cells_uncached(a: CellIndex, b: CellIndex) -> f64 {
    let a: h3o::LatLng = a.into();
    let b: h3o::LatLng = b.into();
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

const DISTANCE_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(50_000) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

/// Global distance cache (50,000 entries, ~800KB memory).
fn distance_cache() -> &'static Mutex<LruCache<(CellIndex, CellIndex), f64>> {
    static CACHE: OnceLock<Mutex<LruCache<(CellIndex, CellIndex), f64>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(LruCache::new(DISTANCE_CACHE_SIZE)))
}

/// Great-circle distance between two H3 cells with LRU caching.
///
/// Uses a global LRU cache to avoid repeated cell → LatLng conversions and
/// Haversine calculations for frequently queried pairs.
pub fn distance_km_between_cells(a: CellIndex, b: CellIndex) -> f64 {
    if a == b {
        return 0.0;
    }
    // Symmetric key (smaller cell first) to maximize cache hits
    let key = if a < b { (a, b) } else { (b, a) };

    let mut cache = match distance_cache().lock() {
        Ok(guard) => guard,
        Err(_) => return distance_km_between_cells_uncached(key.0, key.1), // Fallback: compute without cache if mutex poisoned
    };
    *cache.get_or_insert(key, || distance_km_between_cells_uncached(key.0, key.1))
}
