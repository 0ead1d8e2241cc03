//! The workflow capability trait.
//!
//! A workflow provides a small capability set - validate, handle,
//! build responses - and declares its sub-stage table as data. The
//! engine owns everything else: persistence, transition validation,
//! conflict retry, finalization and callback firing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use stevedore_core::{CallbackDescriptor, SubStage, TaskLink, TaskRecord, ValidationError};

use crate::engine::TaskEngine;
use crate::error::TaskFailure;
use crate::transition::TaskTransition;

/// Capability set of one workflow type.
#[async_trait]
pub trait TaskWorkflow: Sized + Send + Sync + 'static {
    /// The workflow's sub-stage enum.
    type SubStage: SubStage;

    /// The workflow's payload fields.
    type Payload: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Per-engine context handed to handlers (config, child engines).
    type Context: Send + Sync + 'static;

    /// Document kind of this workflow's records.
    const KIND: &'static str;

    /// Factory link prefix the records live under.
    const FACTORY_LINK: &'static str;

    /// Display name used in status tracking and logs.
    const DISPLAY_NAME: &'static str;

    /// Whether records delete themselves after finalization.
    const SELF_DELETE: bool = false;

    /// Validate a payload before a record is created. Failures are
    /// rejected synchronously and never enter the state machine.
    fn validate(payload: &Self::Payload) -> Result<(), ValidationError>;

    /// Handle one settled sub-stage. The handler reads the record and
    /// issues transitions through the engine; it never mutates the
    /// record in place. A returned failure drives the record to the
    /// ERROR sub-stage.
    async fn handle_sub_stage(
        engine: &Arc<TaskEngine<Self>>,
        record: &TaskRecord<Self::SubStage, Self::Payload>,
    ) -> Result<(), TaskFailure>;

    /// Hook invoked while an accepted transition is merged into the
    /// record copy, before it is persisted. Used for transition-driven
    /// field rewrites the field-merge cannot express.
    fn merge_transition(
        _record: &mut TaskRecord<Self::SubStage, Self::Payload>,
        _transition: &TaskTransition,
        _target: Self::SubStage,
    ) {
    }

    /// Extra response fields merged into a success callback.
    fn finished_response(_record: &TaskRecord<Self::SubStage, Self::Payload>) -> Value {
        Value::Null
    }

    /// Extra response fields merged into a failure callback.
    fn failed_response(_record: &TaskRecord<Self::SubStage, Self::Payload>) -> Value {
        Value::Null
    }
}

/// Request to create a new task record.
pub struct CreateRequest<W: TaskWorkflow> {
    /// Explicit self link; generated under the factory when absent.
    /// Child tasks use deterministic links so a crash replay recreates
    /// the same record instead of a duplicate.
    pub self_link: Option<TaskLink>,

    /// The workflow payload.
    pub payload: W::Payload,

    /// Optional parent notification descriptor.
    pub callback: Option<CallbackDescriptor>,

    /// Tenant scope of the request.
    pub tenant_links: Vec<String>,

    /// Initial custom properties.
    pub custom_properties: HashMap<String, String>,

    /// Optional request status tracker link.
    pub tracker_link: Option<String>,
}

impl<W: TaskWorkflow> CreateRequest<W> {
    /// Create a request with just a payload.
    pub fn new(payload: W::Payload) -> Self {
        Self {
            self_link: None,
            payload,
            callback: None,
            tenant_links: Vec::new(),
            custom_properties: HashMap::new(),
            tracker_link: None,
        }
    }

    /// Builder method to pin the record's self link.
    pub fn with_self_link(mut self, self_link: TaskLink) -> Self {
        self.self_link = Some(self_link);
        self
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

    /// Builder method to set initial custom properties.
    pub fn with_custom_properties(mut self, custom_properties: HashMap<String, String>) -> Self {
        self.custom_properties = custom_properties;
        self
    }

    /// Builder method to set the tracker link.
    pub fn with_tracker_link(mut self, tracker_link: impl Into<String>) -> Self {
        self.tracker_link = Some(tracker_link.into());
        self
    }
}
