//! Self-directed state transition requests.
//!
//! A transition is an explicit command applied by the engine's
//! transition function: handlers build transitions instead of mutating
//! records in place, which keeps them pure and testable in isolation.

use std::collections::HashMap;

use serde_json::Value;

use stevedore_core::{ErrorDetail, SubStage, TaskStage};

use crate::error::EngineError;

/// A requested state transition for a task record.
///
/// The sub-stage travels by serialized name so transitions can cross
/// workflow boundaries (callback firing). A transition carrying a
/// failure always drives the record to FAILED regardless of `stage`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    /// Requested stage.
    pub stage: TaskStage,

    /// Requested sub-stage, by serialized name.
    pub sub_stage: String,

    /// Structured failure; presence forces the FAILED stage.
    pub failure: Option<ErrorDetail>,

    /// Object merged field-by-field into the record payload. Null
    /// fields are skipped, mirroring merge-if-not-null semantics.
    pub patch: Value,

    /// Properties merged into the record's custom properties.
    pub custom_properties: HashMap<String, String>,
}

impl TaskTransition {
    /// Create a transition to the given stage and sub-stage.
    pub fn to(stage: TaskStage, sub_stage: impl Into<String>) -> Self {
        Self {
            stage,
            sub_stage: sub_stage.into(),
            failure: None,
            patch: Value::Null,
            custom_properties: HashMap::new(),
        }
    }

    /// Attach a payload patch object.
    pub fn with_patch(mut self, patch: Value) -> Self {
        self.patch = patch;
        self
    }

    /// Attach a structured failure.
    pub fn with_failure(mut self, failure: ErrorDetail) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Attach custom properties.
    pub fn with_custom_properties(mut self, custom_properties: HashMap<String, String>) -> Self {
        self.custom_properties = custom_properties;
        self
    }
}

/// Serialized name of a sub-stage value, e.g. `"HOSTS_SELECTED"`.
pub fn sub_stage_name<S: SubStage>(sub_stage: S) -> Result<String, EngineError> {
    match serde_json::to_value(sub_stage)? {
        Value::String(name) => Ok(name),
        other => Err(EngineError::Serialization(format!(
            "sub-stage did not serialize to a string: {}",
            other
        ))),
    }
}

/// Parse a sub-stage from its serialized name.
pub fn parse_sub_stage<S: SubStage>(name: &str) -> Result<S, EngineError> {
    serde_json::from_value(Value::String(name.to_owned()))
        .map_err(|_| EngineError::UnknownSubStage(name.to_owned()))
}
