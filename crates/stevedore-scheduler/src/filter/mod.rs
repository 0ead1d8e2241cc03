//! Host selection filter pipeline.
//!
//! A filter narrows the candidate set for a resource description.
//! Filters run sequentially in declaration order, so the first failing
//! constraint is the one whose message surfaces. An empty candidate set
//! after any filter is the hard "no suitable host" failure; a filter's
//! own constraint error is distinguished from it and surfaced verbatim.

pub mod affinity;
pub mod policy;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use stevedore_core::{HostSelection, ResourceDescription};
use stevedore_store::{DocumentStore, StoreError};

pub use affinity::{AffinityConstraint, AffinityHostFilter};
pub use policy::DeploymentPolicyFilter;

/// Filter pipeline failure.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A selection constraint rejected the candidate set. The message
    /// is surfaced verbatim to the caller.
    #[error("{0}")]
    Selection(String),

    /// The candidate set became empty after a filter ran.
    #[error("no suitable host: filtered host selection is empty")]
    NoSuitableHost,

    /// Store failure while a filter queried peer documents.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One predicate of the pipeline.
#[async_trait]
pub trait HostSelectionFilter: Send + Sync {
    /// Inactive filters are skipped without running.
    fn is_active(&self) -> bool {
        true
    }

    /// Narrow the candidate set. Order of the surviving candidates is
    /// preserved.
    async fn filter(
        &self,
        candidates: Vec<HostSelection>,
    ) -> Result<Vec<HostSelection>, FilterError>;
}

/// Memory-fit comparison with 0-as-unlimited semantics on either side.
pub fn memory_fits(available: u64, required: u64) -> bool {
    required == 0 || available == 0 || available >= required
}

/// `min` of two limits where 0 means unlimited.
pub fn min_unlimited(a: u64, b: u64) -> u64 {
    if a == 0 {
        b
    } else if b == 0 {
        a
    } else {
        a.min(b)
    }
}

/// Rejects hosts whose declared capability set excludes the requested
/// resource kind.
pub struct HostKindFilter {
    resource_type: String,
}

impl HostKindFilter {
    /// Create a filter for the requested resource kind.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
        }
    }
}

#[async_trait]
impl HostSelectionFilter for HostKindFilter {
    async fn filter(
        &self,
        mut candidates: Vec<HostSelection>,
    ) -> Result<Vec<HostSelection>, FilterError> {
        candidates.retain(|c| {
            c.supported_resource_kinds
                .iter()
                .any(|kind| kind == &self.resource_type)
        });
        Ok(candidates)
    }
}

/// Rejects hosts whose available memory is below the requested unit
/// size, treating 0 as unlimited on either side of the comparison.
pub struct MemoryFitFilter {
    memory_limit: u64,
}

impl MemoryFitFilter {
    /// Create a filter for the per-instance memory limit.
    pub fn new(memory_limit: u64) -> Self {
        Self { memory_limit }
    }
}

#[async_trait]
impl HostSelectionFilter for MemoryFitFilter {
    fn is_active(&self) -> bool {
        self.memory_limit != 0
    }

    async fn filter(
        &self,
        mut candidates: Vec<HostSelection>,
    ) -> Result<Vec<HostSelection>, FilterError> {
        candidates.retain(|c| memory_fits(c.available_memory, self.memory_limit));
        Ok(candidates)
    }
}

/// The ordered filter chain of one placement run.
///
/// Built once per run from the description's declared requirements;
/// the built-in host-kind and memory-fit filters always run before the
/// custom affinity and deployment-policy filters.
pub struct HostFilterPipeline {
    filters: Vec<Box<dyn HostSelectionFilter>>,
}

impl HostFilterPipeline {
    /// Build the pipeline for one placement run.
    pub fn build(
        store: Arc<dyn DocumentStore>,
        description: &ResourceDescription,
        resource_type: &str,
        context_id: &str,
    ) -> Self {
        let filters: Vec<Box<dyn HostSelectionFilter>> = vec![
            Box::new(HostKindFilter::new(resource_type)),
            Box::new(MemoryFitFilter::new(description.memory_limit)),
            Box::new(AffinityHostFilter::new(store, description, context_id)),
            Box::new(DeploymentPolicyFilter::new(
                description.deployment_policy_id.clone(),
            )),
        ];
        Self { filters }
    }

    /// Pipeline with explicit filters, in evaluation order.
    pub fn with_filters(filters: Vec<Box<dyn HostSelectionFilter>>) -> Self {
        Self { filters }
    }

    /// Run the chain over the candidate set.
    pub async fn run(
        &self,
        candidates: Vec<HostSelection>,
    ) -> Result<Vec<HostSelection>, FilterError> {
        let mut current = candidates;
        if current.is_empty() {
            return Err(FilterError::NoSuitableHost);
        }
        for filter in &self.filters {
            if !filter.is_active() {
                continue;
            }
            current = filter.filter(current).await?;
            debug!(remaining = current.len(), "Host selection filter applied");
            if current.is_empty() {
                return Err(FilterError::NoSuitableHost);
            }
        }
        Ok(current)
    }
}
