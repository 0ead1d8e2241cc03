//! Service callback firing.
//!
//! Firing a callback *is* issuing a transition request on another
//! task's record; the same optimistic-concurrency and idempotence rules
//! apply on the receiving side.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use stevedore_core::{CallbackDescriptor, ErrorDetail};
use stevedore_store::StoreError;

use crate::error::EngineError;
use crate::registry::TaskRegistry;
use crate::transition::TaskTransition;

/// Outcome a callback is fired with.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The child task finished; `response` is merged into the target's
    /// payload.
    Success {
        /// Response fields for the target payload.
        response: Value,
        /// Properties merged into the target's custom properties.
        custom_properties: HashMap<String, String>,
    },
    /// The child task failed.
    Failure {
        /// The child's structured failure.
        error: ErrorDetail,
        /// Response fields for the target payload.
        response: Value,
        /// Properties merged into the target's custom properties.
        custom_properties: HashMap<String, String>,
    },
}

impl CallbackOutcome {
    /// Build a success outcome.
    pub fn success(response: Value, custom_properties: HashMap<String, String>) -> Self {
        Self::Success {
            response,
            custom_properties,
        }
    }

    /// Build a failure outcome.
    pub fn failure(
        error: ErrorDetail,
        response: Value,
        custom_properties: HashMap<String, String>,
    ) -> Self {
        Self::Failure {
            error,
            response,
            custom_properties,
        }
    }
}

/// Fires callback descriptors by routing a transition to the target
/// task's endpoint.
pub struct ServiceCallback {
    registry: Arc<TaskRegistry>,
}

impl ServiceCallback {
    /// Create a callback service over a registry.
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Fire the descriptor with the given outcome. A target that no
    /// longer exists (already cleaned up) is a logged, non-fatal
    /// outcome.
    pub async fn fire(&self, descriptor: &CallbackDescriptor, outcome: CallbackOutcome) {
        let (pair, failure, response, custom_properties) = match outcome {
            CallbackOutcome::Success {
                response,
                custom_properties,
            } => (&descriptor.success, None, response, custom_properties),
            CallbackOutcome::Failure {
                error,
                response,
                custom_properties,
            } => (&descriptor.failure, Some(error), response, custom_properties),
        };

        info!(
            target = %descriptor.target_link,
            stage = %pair.stage,
            sub_stage = %pair.sub_stage,
            "Callback to parent task"
        );

        let mut transition = TaskTransition::to(pair.stage, pair.sub_stage.clone())
            .with_patch(response)
            .with_custom_properties(custom_properties);
        if let Some(failure) = failure {
            transition = transition.with_failure(failure);
        }

        let Some(endpoint) = self.registry.resolve(descriptor.target_link.as_str()) else {
            warn!(
                target = %descriptor.target_link,
                "No endpoint registered for callback target"
            );
            return;
        };

        match endpoint
            .patch(descriptor.target_link.as_str(), transition)
            .await
        {
            Ok(()) => {}
            Err(EngineError::Store(StoreError::NotFound(_))) => {
                warn!(
                    target = %descriptor.target_link,
                    "Callback target no longer exists"
                );
            }
            Err(err) => {
                warn!(
                    target = %descriptor.target_link,
                    error = %err,
                    "Notifying parent task failed"
                );
            }
        }
    }
}
