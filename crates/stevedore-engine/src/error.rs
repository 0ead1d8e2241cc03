//! Engine errors.

use std::fmt;

use thiserror::Error;

use stevedore_core::{TaskStage, ValidationError};
use stevedore_store::StoreError;

/// Errors surfaced by the task engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Record store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Payload validation failure at creation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A record or transition could not be (de)serialized.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// A transition tried to move the stage backwards.
    #[error("stage can not move backwards from {from} to {to}")]
    StageRegression {
        /// Current stage.
        from: TaskStage,
        /// Requested stage.
        to: TaskStage,
    },

    /// A transition tried to move the sub-stage backwards within the
    /// same stage.
    #[error("sub-stage can not move backwards from {from} to {to}")]
    SubStageRegression {
        /// Current sub-stage name.
        from: String,
        /// Requested sub-stage name.
        to: String,
    },

    /// The transition named a sub-stage the workflow does not declare.
    #[error("unknown sub-stage: {0}")]
    UnknownSubStage(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure returned by a workflow stage handler. The engine catches it,
/// wraps it into a structured error and drives the record to the
/// workflow's ERROR sub-stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Human-readable failure message.
    pub message: String,
}

impl TaskFailure {
    /// Create a failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Create a failure with a message and an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl fmt::Display) -> Self {
        Self {
            message: format!("{}: {}", message.into(), source),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskFailure {}

impl From<StoreError> for TaskFailure {
    fn from(err: StoreError) -> Self {
        Self::with_source("store failure", err)
    }
}

impl From<EngineError> for TaskFailure {
    fn from(err: EngineError) -> Self {
        Self::with_source("engine failure", err)
    }
}
