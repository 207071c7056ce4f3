//! Proactive relocation of idle vehicles.
//!
//! - [`demand`]: observed and forecast demand signals
//! - [`targets`]: pluggable target strategies and rounding
//! - [`dispatcher`]: surplus/deficit matching and relocation commits

pub mod demand;
pub mod dispatcher;
pub mod targets;

pub use demand::{BinnedForecast, DemandForecast, DemandObserver, DemandSignal};
pub use dispatcher::{
    PlannedRelocation, Rebalancer, RebalancingReport, Relocation, ZoneRebalancing,
};
pub use targets::{
    DemandWeighted, EqualShare, ForecastMatching, RebalancingTargetCalculator, Rounding,
    TargetVector,
};
