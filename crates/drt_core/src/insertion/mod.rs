//! Online insertion of requests into vehicle schedules.
//!
//! - [`path`]: walks a stop sequence from an anchor, checking windows, ride
//!   times and load, and materializes the resulting task list
//! - [`search`]: enumerates pickup/dropoff positions in one vehicle
//! - [`optimizer`]: fleet-wide search, deterministic selection and commit
//! - [`queue`]: requests waiting for a retry

pub mod optimizer;
pub mod path;
pub mod queue;
pub mod search;

pub use optimizer::{Assignment, InsertionOptimizer, InsertionOutcome};
pub use queue::UnplannedRequests;
pub use search::InsertionCandidate;
