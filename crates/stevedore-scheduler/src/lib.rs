//! Stevedore Placement & Reservation Scheduler
//!
//! Built on the task engine: a placement task narrows a candidate host
//! set through an ordered filter pipeline and emits a fair, cycled
//! assignment list; a reservation task selects among priority-ordered
//! group placements with capacity for a request, escalates from tenant
//! scope to global scope on exhaustion, and performs one optimistic
//! capacity reservation at a time, advancing to the next candidate on
//! conflict.

pub mod config;
pub mod filter;
pub mod placement;
pub mod reservation;

// Re-export commonly used types
pub use config::SchedulerConfig;
pub use filter::{FilterError, HostFilterPipeline, HostSelectionFilter};
pub use placement::{PlacementContext, PlacementSubStage, PlacementTask, PlacementTaskState};
pub use reservation::{
    ReservationContext, ReservationSubStage, ReservationTask, ReservationTaskState,
};
