//! Callback descriptors for parent/child task composition.

use serde::{Deserialize, Serialize};

use crate::ids::TaskLink;
use crate::stage::TaskStage;

/// A stage/sub-stage pair a callback drives its target to.
///
/// The sub-stage is carried by its serialized name so a descriptor can
/// target any workflow type without knowing its sub-stage enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePair {
    /// Target stage.
    pub stage: TaskStage,
    /// Serialized sub-stage name, e.g. `"HOSTS_SELECTED"`.
    pub sub_stage: String,
}

impl StagePair {
    /// Create a new stage pair.
    pub fn new(stage: TaskStage, sub_stage: impl Into<String>) -> Self {
        Self {
            stage,
            sub_stage: sub_stage.into(),
        }
    }
}

/// Tells a child task which parent task to notify on completion, and
/// which transitions to request for a successful and a failed outcome.
///
/// A task carries at most one callback; firing it is the end of the
/// task's external notification responsibility. Redelivery is safe
/// because the receiving transition is itself idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    /// Self link of the task to notify.
    pub target_link: TaskLink,
    /// Transition requested when the child finishes successfully.
    pub success: StagePair,
    /// Transition requested when the child fails.
    pub failure: StagePair,
}

impl CallbackDescriptor {
    /// Create a descriptor with explicit stage/sub-stage pairs.
    pub fn new(target_link: TaskLink, success: StagePair, failure: StagePair) -> Self {
        Self {
            target_link,
            success,
            failure,
        }
    }

    /// Descriptor driving the target's own stage only, used by counter
    /// subtasks where the receiver interprets FINISHED/FAILED directly.
    pub fn stages_only(target_link: TaskLink) -> Self {
        Self {
            target_link,
            success: StagePair::new(TaskStage::Finished, "COMPLETED"),
            failure: StagePair::new(TaskStage::Failed, "ERROR"),
        }
    }
}
