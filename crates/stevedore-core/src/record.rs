//! The persisted task record.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::callback::CallbackDescriptor;
use crate::error::ErrorDetail;
use crate::ids::TaskLink;
use crate::stage::{SubStage, TaskStage};

/// A task record is the single unit of persisted workflow state.
///
/// It is mutated exclusively through self-issued transition requests
/// applied under optimistic concurrency; `version` mirrors the store
/// document version the record was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize, P: Serialize",
    deserialize = "S: DeserializeOwned, P: DeserializeOwned"
))]
pub struct TaskRecord<S, P> {
    /// Unique self link of this record.
    pub self_link: TaskLink,

    /// Coarse lifecycle stage.
    pub stage: TaskStage,

    /// Workflow-specific sub-stage.
    pub sub_stage: S,

    /// Store document version at the time of the read, used for
    /// compare-and-swap updates.
    #[serde(default)]
    pub version: u64,

    /// Workflow-specific payload fields.
    pub payload: P,

    /// Optional parent notification descriptor.
    pub callback: Option<CallbackDescriptor>,

    /// Structured failure, set when the task enters its error path.
    pub failure: Option<ErrorDetail>,

    /// Tenant scope of the request. Empty means global scope.
    #[serde(default)]
    pub tenant_links: Vec<String>,

    /// Free-form properties merged into callback responses.
    #[serde(default)]
    pub custom_properties: HashMap<String, String>,

    /// Optional link to a request status tracker document.
    pub tracker_link: Option<String>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record becomes eligible for expiry. Enforcement is
    /// external to this core.
    pub expiration_time: DateTime<Utc>,
}

impl<S: SubStage, P> TaskRecord<S, P> {
    /// Create a new record in CREATED stage with the given expiration.
    pub fn new(self_link: TaskLink, payload: P, expiration_time: DateTime<Utc>) -> Self {
        Self {
            self_link,
            stage: TaskStage::Created,
            sub_stage: S::created(),
            version: 0,
            payload,
            callback: None,
            failure: None,
            tenant_links: Vec::new(),
            custom_properties: HashMap::new(),
            tracker_link: None,
            created_at: Utc::now(),
            expiration_time,
        }
    }

    /// Builder method to attach a callback descriptor.
    pub fn with_callback(mut self, callback: CallbackDescriptor) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Builder method to set the tenant scope.
    pub fn with_tenant_links(mut self, tenant_links: Vec<String>) -> Self {
        self.tenant_links = tenant_links;
        self
    }

    /// Builder method to set the tracker document link.
    pub fn with_tracker_link(mut self, tracker_link: impl Into<String>) -> Self {
        self.tracker_link = Some(tracker_link.into());
        self
    }

    /// Check if the record is in a terminal stage.
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Check if the record failed or was cancelled.
    pub fn is_failed_or_cancelled(&self) -> bool {
        matches!(self.stage, TaskStage::Failed | TaskStage::Cancelled)
    }
}
