//! Task stage and sub-stage model.
//!
//! A task moves through the coarse [`TaskStage`] lifecycle while its
//! workflow-specific [`SubStage`] tracks progress within the STARTED
//! stage. Both are strictly ordered; transitions may never move
//! backwards within a stage.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle stage of a task record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    /// Record persisted, first self-transition not yet applied.
    #[default]
    Created,
    /// Task is actively moving through its sub-stages.
    Started,
    /// Task completed successfully.
    Finished,
    /// Task failed; the record carries a structured failure.
    Failed,
    /// Task was cancelled.
    Cancelled,
}

impl TaskStage {
    /// Returns true if the stage accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", name)
    }
}

/// Workflow-specific sub-stage enum.
///
/// Each workflow declares its sub-stages as data: `all()` lists the
/// variants in transition order, and the engine uses the list both for
/// monotonicity checks and for progress reporting. Every workflow has a
/// creation sub-stage, a terminal success sub-stage and a terminal error
/// sub-stage.
pub trait SubStage:
    Copy
    + Eq
    + Ord
    + fmt::Debug
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// All sub-stages in transition order.
    fn all() -> &'static [Self];

    /// The sub-stage a new record starts in.
    fn created() -> Self;

    /// The terminal success sub-stage.
    fn completed() -> Self;

    /// The terminal error sub-stage.
    fn error() -> Self;

    /// Transient sub-stages mark work in flight: a crash recovery pass
    /// re-issues the side-effecting action, and an out-of-order patch
    /// into them is tolerated instead of rejected.
    fn is_transient(self) -> bool {
        false
    }

    /// Position of this sub-stage within `all()`.
    fn ordinal(self) -> usize {
        Self::all().iter().position(|s| *s == self).unwrap_or(0)
    }
}

/// The minimal sub-stage set shared by simple workflows.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultSubStage {
    #[default]
    Created,
    Completed,
    Error,
}

impl SubStage for DefaultSubStage {
    fn all() -> &'static [Self] {
        &[Self::Created, Self::Completed, Self::Error]
    }

    fn created() -> Self {
        Self::Created
    }

    fn completed() -> Self {
        Self::Completed
    }

    fn error() -> Self {
        Self::Error
    }
}
