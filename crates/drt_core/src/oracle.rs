//! Travel-time oracle: the external collaborator that answers
//! "when do I arrive if I leave now".
//!
//! The dispatch core never computes routes itself. Two implementations ship
//! with the crate:
//!
//! - **`H3GridOracle`**: Haversine distance at a constant speed. Zero dependencies.
//! - **`CachedOracle`**: LRU cache in front of any time-independent oracle.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use h3o::CellIndex;
use lru::LruCache;

use crate::error::OracleError;
use crate::spatial::distance_km_between_cells;
use crate::SimTime;

/// Answer of a travel-time query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelEstimate {
    pub arrival_time: SimTime,
    pub distance_km: f64,
}

/// Travel-time and distance estimation.
///
/// Implementations must be pure and synchronous: the same query always yields
/// the same answer, and calls may arrive concurrently from evaluation threads.
pub trait TravelTimeOracle: Send + Sync {
    fn estimate(
        &self,
        origin: CellIndex,
        destination: CellIndex,
        departure: SimTime,
    ) -> Result<TravelEstimate, OracleError>;
}

/// Straight-line travel at a constant average speed.
#[derive(Debug, Clone, Copy)]
pub struct H3GridOracle {
    speed_kmh: f64,
}

impl H3GridOracle {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }
}

impl Default for H3GridOracle {
    /// 40 km/h average city speed.
    fn default() -> Self {
        Self::new(40.0)
    }
}

impl TravelTimeOracle for H3GridOracle {
    fn estimate(
        &self,
        origin: CellIndex,
        destination: CellIndex,
        departure: SimTime,
    ) -> Result<TravelEstimate, OracleError> {
        if self.speed_kmh <= 0.0 {
            return Err(OracleError::NoRoute {
                from: origin,
                to: destination,
            });
        }
        let distance_km = distance_km_between_cells(origin, destination);
        let duration_secs = (distance_km / self.speed_kmh * 3_600.0).ceil() as SimTime;
        Ok(TravelEstimate {
            arrival_time: departure.saturating_add(duration_secs),
            distance_km,
        })
    }
}

/// Memoizes (duration, distance) per cell pair.
///
/// Only valid for oracles whose durations do not depend on departure time.
pub struct CachedOracle<O> {
    inner: O,
    cache: Mutex<LruCache<(CellIndex, CellIndex), (SimTime, f64)>>,
}

impl<O: TravelTimeOracle> CachedOracle<O> {
    pub fn new(inner: O, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl<O: TravelTimeOracle> TravelTimeOracle for CachedOracle<O> {
    fn estimate(
        &self,
        origin: CellIndex,
        destination: CellIndex,
        departure: SimTime,
    ) -> Result<TravelEstimate, OracleError> {
        let key = (origin, destination);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(&(duration, distance_km)) = cache.get(&key) {
                return Ok(TravelEstimate {
                    arrival_time: departure.saturating_add(duration),
                    distance_km,
                });
            }
        }

        // Failures are not cached; the next query asks again.
        let estimate = self.inner.estimate(origin, destination, departure)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                (
                    estimate.arrival_time.saturating_sub(departure),
                    estimate.distance_km,
                ),
            );
        }
        Ok(estimate)
    }
}
