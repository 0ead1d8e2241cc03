//! Group placement documents: the reservation targets of the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::ids::{PlacementLink, PoolLink};

/// Value of `max_instances` / `memory_limit` meaning "no limit".
pub const UNLIMITED: u64 = 0;

/// Capacity check failure while reserving against a group placement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReserveError {
    /// Requested more instances than the placement has available.
    #[error("requested instances are more than the available: {available}")]
    InsufficientInstances {
        /// Instances currently available.
        available: u64,
    },

    /// Requested more memory than the placement has available.
    #[error("requested memory is more than the available: {available}")]
    InsufficientMemory {
        /// Memory currently available, in bytes.
        available: u64,
    },

    /// Released more instances than were allocated.
    #[error("released more instances than previously reserved")]
    ReleaseUnderflow,
}

/// A group placement ties a tenant-scoped instance/memory quota to a
/// resource pool, with an ascending priority among its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPlacementState {
    /// Self link of this placement document.
    pub self_link: PlacementLink,

    /// Display name of the placement.
    pub name: String,

    /// The resource pool this placement allocates from.
    pub resource_pool_link: PoolLink,

    /// Resource type the quota applies to.
    pub resource_type: String,

    /// Ascending priority; lower is preferred.
    pub priority: i32,

    /// Maximum instances. 0 means unlimited.
    #[serde(default)]
    pub max_instances: u64,

    /// Instances currently available to be allocated.
    #[serde(default)]
    pub available_instances: u64,

    /// Instances currently allocated.
    #[serde(default)]
    pub allocated_instances: u64,

    /// Memory limit in bytes. 0 means unlimited.
    #[serde(default)]
    pub memory_limit: u64,

    /// Memory currently available to be allocated, in bytes.
    #[serde(default)]
    pub available_memory: u64,

    /// Deployment policy advertised by this placement, if any.
    pub deployment_policy_link: Option<String>,

    /// Tenant scope. Empty means the placement is global.
    #[serde(default)]
    pub tenant_links: Vec<String>,

    /// Custom properties merged into the reservation result.
    #[serde(default)]
    pub custom_properties: HashMap<String, String>,
}

impl GroupPlacementState {
    /// Document kind of group placements.
    pub const KIND: &'static str = "group-placement";

    /// True when the placement has no tenant scope.
    pub fn is_global(&self) -> bool {
        self.tenant_links.is_empty()
    }

    /// Reserve `count` instances requiring `memory_per_instance` bytes
    /// each. The whole count is taken from this placement or none of it.
    pub fn reserve(&mut self, count: u64, memory_per_instance: u64) -> Result<(), ReserveError> {
        if self.max_instances != UNLIMITED {
            if self.available_instances < count {
                return Err(ReserveError::InsufficientInstances {
                    available: self.available_instances,
                });
            }
            self.available_instances -= count;
        }
        if self.memory_limit != UNLIMITED && memory_per_instance != UNLIMITED {
            let required = count * memory_per_instance;
            if self.available_memory < required {
                // roll back the instance decrement applied above
                if self.max_instances != UNLIMITED {
                    self.available_instances += count;
                }
                return Err(ReserveError::InsufficientMemory {
                    available: self.available_memory,
                });
            }
            self.available_memory -= required;
        }
        self.allocated_instances += count;
        Ok(())
    }

    /// Release `count` previously reserved instances.
    pub fn release(&mut self, count: u64, memory_per_instance: u64) -> Result<(), ReserveError> {
        if self.allocated_instances < count {
            return Err(ReserveError::ReleaseUnderflow);
        }
        self.allocated_instances -= count;
        if self.max_instances != UNLIMITED {
            self.available_instances = (self.available_instances + count).min(self.max_instances);
        }
        if self.memory_limit != UNLIMITED && memory_per_instance != UNLIMITED {
            self.available_memory =
                (self.available_memory + count * memory_per_instance).min(self.memory_limit);
        }
        Ok(())
    }
}

/// One entry of the allocator's priority-ordered candidate list: a
/// group placement and the resource pool backing it. Sourced by query
/// on every reservation attempt, never cached across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementCandidate {
    /// Link of the candidate group placement.
    pub placement_link: PlacementLink,

    /// Link of the resource pool backing the placement.
    pub resource_pool_link: PoolLink,

    /// Declared priority of the placement; ascending is preferred.
    pub priority: i32,
}
