//! Request status tracking.
//!
//! When a record names a tracker document, every transition upserts a
//! coarse status view of the task: the queryable audit trail request
//! history reads. Tracker failures never fail the task.

use serde::{Deserialize, Serialize};

use stevedore_core::{ErrorDetail, SubStage, TaskRecord, TaskStage};

use crate::transition::sub_stage_name;
use crate::workflow::TaskWorkflow;

/// Queryable status view of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusState {
    /// Link of the task this status describes.
    pub task_link: String,

    /// Workflow display name.
    pub phase: String,

    /// Current stage.
    pub stage: TaskStage,

    /// Current sub-stage name.
    pub sub_stage: String,

    /// Coarse progress percentage derived from the sub-stage ordinal.
    pub progress: u8,

    /// Structured failure once the task failed.
    pub failure: Option<ErrorDetail>,
}

impl TaskStatusState {
    /// Document kind of status records.
    pub const KIND: &'static str = "request-status";

    /// Build a status view from a task record.
    pub fn from_record<W: TaskWorkflow>(
        record: &TaskRecord<W::SubStage, W::Payload>,
    ) -> Self {
        // progress is the sub-stage ordinal over the count of normal
        // sub-stages (terminal success included, error excluded)
        let normal = W::SubStage::all().len().saturating_sub(2).max(1);
        let progress = ((100 * record.sub_stage.ordinal()) / normal).min(100) as u8;
        Self {
            task_link: record.self_link.to_string(),
            phase: W::DISPLAY_NAME.to_owned(),
            stage: record.stage,
            sub_stage: sub_stage_name(record.sub_stage)
                .unwrap_or_else(|_| format!("{:?}", record.sub_stage)),
            progress,
            failure: record.failure.clone(),
        }
    }
}
