//! Fleet and schedule model: the shared state every dispatch decision mutates.
//!
//! Tasks hold identifiers only (request ids, zone ids); a vehicle's schedule is
//! owned by its slot in the [`Fleet`] and only mutated through the validated
//! [`Fleet::commit`] family.

mod fleet;
mod request;
mod schedule;
mod task;
mod vehicle;

pub use fleet::{Fleet, TaskTransition, VehicleSnapshot};
pub use request::{Request, RequestBook, RequestId, RequestState};
pub use schedule::{Anchor, Boarded, Schedule, ScheduleState};
pub use task::{Stop, StopKind, Task, TaskKind, TaskStatus};
pub use vehicle::{Vehicle, VehicleId};
