//! Core domain errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured failure persisted on a failed task record.
///
/// The record is always self-describing about why it failed; the detail
/// travels with callback notifications to parent tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable failure message.
    pub message: String,
}

impl ErrorDetail {
    /// Create a new error detail.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for ErrorDetail {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ErrorDetail {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_owned(),
        }
    }
}

/// Validation failure raised synchronously at task creation. A request
/// that fails validation never enters the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is empty or missing.
    #[error("'{0}' is required")]
    MissingField(&'static str),

    /// A count field must be strictly positive.
    #[error("'{0}' must be greater than 0")]
    NonPositiveCount(&'static str),
}
