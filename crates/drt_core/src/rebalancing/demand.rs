//! Per-zone demand signals.
//!
//! Observed demand comes from request origins over a sliding window;
//! forecast demand comes from an optional per-zone, per-time-bin table.

use std::collections::{BTreeMap, VecDeque};

use crate::spatial::ZoneId;
use crate::SimTime;

/// Expected number of requests per zone over some horizon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandSignal {
    zones: BTreeMap<ZoneId, f64>,
}

impl DemandSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, zone: ZoneId, demand: f64) {
        *self.zones.entry(zone).or_insert(0.0) += demand;
    }

    /// Demand of `zone`, zero when unknown.
    pub fn get(&self, zone: ZoneId) -> f64 {
        self.zones.get(&zone).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.zones.values().sum()
    }

    pub fn zones(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.zones.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ZoneId, f64)> + '_ {
        self.zones.iter().map(|(zone, demand)| (*zone, *demand))
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl FromIterator<(ZoneId, f64)> for DemandSignal {
    fn from_iter<I: IntoIterator<Item = (ZoneId, f64)>>(iter: I) -> Self {
        let mut signal = Self::new();
        for (zone, demand) in iter {
            signal.add(zone, demand);
        }
        signal
    }
}

/// Source of expected demand for an upcoming horizon.
pub trait DemandForecast: Send + Sync {
    /// Expected requests per zone with origin time in `[from, to)`.
    fn expected_demand(&self, from: SimTime, to: SimTime) -> DemandSignal;
}

/// Request origins seen within the last `window_secs`.
#[derive(Debug)]
pub struct DemandObserver {
    window_secs: SimTime,
    arrivals: VecDeque<(SimTime, ZoneId)>,
}

impl DemandObserver {
    pub fn new(window_secs: SimTime) -> Self {
        Self {
            window_secs,
            arrivals: VecDeque::new(),
        }
    }

    /// Record a request submitted at `time` with origin in `zone`.
    ///
    /// Times are expected to be non-decreasing, as delivered by the host clock.
    pub fn record(&mut self, time: SimTime, zone: ZoneId) {
        self.arrivals.push_back((time, zone));
    }

    /// Drop arrivals at or before `now - window`.
    pub fn prune(&mut self, now: SimTime) {
        let Some(horizon) = now.checked_sub(self.window_secs) else {
            return;
        };
        while self.arrivals.front().is_some_and(|(time, _)| *time <= horizon) {
            self.arrivals.pop_front();
        }
    }

    /// Counts per zone over `(now - window, now]`.
    pub fn signal(&self, now: SimTime) -> DemandSignal {
        let horizon = now.checked_sub(self.window_secs);
        self.arrivals
            .iter()
            .filter(|(time, _)| *time <= now && horizon.map_or(true, |h| *time > h))
            .map(|(_, zone)| (*zone, 1.0))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}

/// Forecast table of expected requests per zone and fixed-width time bin.
#[derive(Debug, Clone)]
pub struct BinnedForecast {
    bin_secs: SimTime,
    bins: BTreeMap<ZoneId, BTreeMap<SimTime, f64>>,
}

impl BinnedForecast {
    pub fn new(bin_secs: SimTime) -> Self {
        Self {
            bin_secs: bin_secs.max(1),
            bins: BTreeMap::new(),
        }
    }

    /// Set the expected demand of `zone` in the bin containing `time`.
    pub fn with_demand(mut self, zone: ZoneId, time: SimTime, expected: f64) -> Self {
        self.insert(zone, time, expected);
        self
    }

    pub fn insert(&mut self, zone: ZoneId, time: SimTime, expected: f64) {
        self.bins
            .entry(zone)
            .or_default()
            .insert(time / self.bin_secs, expected);
    }
}

impl DemandForecast for BinnedForecast {
    /// Bins partially inside the horizon contribute proportionally to the
    /// overlap.
    fn expected_demand(&self, from: SimTime, to: SimTime) -> DemandSignal {
        let mut signal = DemandSignal::new();
        if to <= from {
            return signal;
        }
        let first = from / self.bin_secs;
        let last = (to - 1) / self.bin_secs;
        for (zone, bins) in &self.bins {
            let expected: f64 = bins
                .range(first..=last)
                .map(|(bin, demand)| {
                    let start = bin * self.bin_secs;
                    let end = start.saturating_add(self.bin_secs);
                    let overlap = end.min(to).saturating_sub(start.max(from));
                    demand * overlap as f64 / self.bin_secs as f64
                })
                .sum();
            if expected > 0.0 {
                signal.add(*zone, expected);
            }
        }
        signal
    }
}
