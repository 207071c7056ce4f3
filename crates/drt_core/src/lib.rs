//! Dispatch core for demand-responsive transport fleets.
//!
//! The crate assigns on-demand point-to-point requests to vehicles by online
//! insertion and proactively repositions idle vehicles towards zones of
//! anticipated demand. It is embedded in a host simulation that owns the clock,
//! moves vehicles and calls back with task events; travel times come from an
//! external [`oracle::TravelTimeOracle`].
//!
//! - [`spatial`]: H3 zone partition, idle-vehicle aggregation, cached distances
//! - [`model`]: vehicles, tasks, schedules and the [`model::Fleet`] aggregate
//! - [`insertion`]: least-detour insertion search and request withdrawal
//! - [`rebalancing`]: demand signals, target strategies and the relocation dispatcher
//! - [`drt`]: [`drt::DrtOptimizer`], the facade the host drives per tick
//! - [`systems`]: `bevy_ecs` systems that route host events into the facade

pub mod config;
pub mod drt;
pub mod error;
pub mod insertion;
pub mod model;
pub mod oracle;
pub mod rebalancing;
pub mod spatial;
pub mod systems;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

/// Simulation time in whole seconds since the simulation started.
pub type SimTime = u64;

pub use config::{DispatchConfig, RebalancingConfig};
pub use drt::{DrtOptimizer, RequestOutcome};
pub use error::{ConflictReason, DispatchError, OracleError, Rejection};
