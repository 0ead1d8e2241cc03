//! Stevedore Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/transport
//! - The document store
//! - Runtime specifics
//!
//! All types here represent the core business domain of the Stevedore
//! control plane: task records and their stage model, callback
//! descriptors, host/placement documents and structured errors.

pub mod callback;
pub mod description;
pub mod error;
pub mod host;
pub mod ids;
pub mod pool;
pub mod record;
pub mod stage;

// Re-export commonly used types
pub use callback::{CallbackDescriptor, StagePair};
pub use description::{ResourceDescription, ResourceState};
pub use error::{ErrorDetail, ValidationError};
pub use host::{HostDescription, HostSelection, HostState, PowerState};
pub use ids::{HostLink, PlacementLink, PoolLink, TaskLink};
pub use pool::{GroupPlacementState, PlacementCandidate, ReserveError};
pub use record::TaskRecord;
pub use stage::{DefaultSubStage, SubStage, TaskStage};
