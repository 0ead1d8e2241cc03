//! Counter subtasks: fan-in of N independent completions.
//!
//! A task fanning out M child operations creates one counter subtask
//! and hands each child a callback descriptor targeting it. Children
//! complete independently; the counter fires its own downstream
//! notification exactly once - on the first decrement to zero, or on
//! the first failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stevedore_core::{CallbackDescriptor, ErrorDetail, TaskLink, TaskStage};
use stevedore_store::DocumentStore;

use crate::callback::{CallbackOutcome, ServiceCallback};
use crate::error::EngineError;
use crate::registry::{TaskEndpoint, TaskRegistry};
use crate::transition::TaskTransition;

/// Factory link counter subtask records live under.
pub const COUNTER_FACTORY_LINK: &str = "/requests/counter-subtasks";

/// Document kind of counter subtask records.
pub const COUNTER_KIND: &str = "counter-subtask";

/// Persisted state of one counter subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSubTaskState {
    /// Self link of this counter.
    pub self_link: TaskLink,

    /// Completions still outstanding. Only ever decreases.
    pub completions_remaining: u64,

    /// Set when any completion reported failure.
    pub failed: bool,

    /// Set by the one completion that fired the notification; all
    /// later completions are ignored.
    pub notified: bool,

    /// The first reported failure, if any.
    pub failure: Option<ErrorDetail>,

    /// Downstream notification target.
    pub callback: CallbackDescriptor,
}

/// One child completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterCompletion {
    /// The child finished successfully.
    Success,
    /// The child failed.
    Failure(ErrorDetail),
}

/// Creates counter subtasks and applies completions to them.
pub struct CounterSubTaskService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TaskRegistry>,
}

impl CounterSubTaskService {
    /// Create the service and register it for callback routing.
    pub fn new(store: Arc<dyn DocumentStore>, registry: &Arc<TaskRegistry>) -> Arc<Self> {
        let service = Arc::new(Self {
            store,
            registry: registry.clone(),
        });
        registry.register(COUNTER_FACTORY_LINK, service.clone());
        service
    }

    /// Persist a counter expecting `completions` child completions,
    /// firing `callback` when they all arrive or any one fails.
    pub async fn create_for(
        &self,
        completions: u64,
        callback: CallbackDescriptor,
    ) -> Result<TaskLink, EngineError> {
        let self_link = TaskLink::generate_under(COUNTER_FACTORY_LINK);
        let state = CounterSubTaskState {
            self_link: self_link.clone(),
            completions_remaining: completions,
            failed: false,
            notified: false,
            failure: None,
            callback,
        };
        self.store
            .create(COUNTER_KIND, self_link.as_str(), serde_json::to_value(&state)?)
            .await?;
        Ok(self_link)
    }

    /// Record one child completion.
    ///
    /// The decrement runs in a version-checked compare-and-swap loop
    /// with no retry bound: under high fan-out many children race, and
    /// a lost race must re-read and retry, never drop a decrement. The
    /// update that flips `notified` is the one that fires.
    pub async fn complete(
        &self,
        self_link: &TaskLink,
        completion: CounterCompletion,
    ) -> Result<(), EngineError> {
        loop {
            let document = self.store.get(self_link.as_str()).await?;
            let mut state: CounterSubTaskState = document.parse()?;

            if state.notified {
                debug!(counter = %self_link, "Counter already notified, ignoring completion");
                return Ok(());
            }

            let outcome = match &completion {
                CounterCompletion::Failure(error) => {
                    state.failed = true;
                    state.notified = true;
                    state.failure = Some(error.clone());
                    Some(CallbackOutcome::failure(
                        error.clone(),
                        serde_json::Value::Null,
                        Default::default(),
                    ))
                }
                CounterCompletion::Success => {
                    state.completions_remaining = state.completions_remaining.saturating_sub(1);
                    if state.completions_remaining == 0 {
                        state.notified = true;
                        Some(CallbackOutcome::success(
                            serde_json::Value::Null,
                            Default::default(),
                        ))
                    } else {
                        None
                    }
                }
            };

            match self
                .store
                .update(
                    self_link.as_str(),
                    document.version,
                    serde_json::to_value(&state)?,
                )
                .await
            {
                Ok(_) => {
                    if let Some(outcome) = outcome {
                        ServiceCallback::new(self.registry.clone())
                            .fire(&state.callback, outcome)
                            .await;
                    }
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    debug!(counter = %self_link, "Completion raced, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl TaskEndpoint for CounterSubTaskService {
    async fn patch(&self, link: &str, transition: TaskTransition) -> Result<(), EngineError> {
        let completion = if transition.failure.is_some() || transition.stage == TaskStage::Failed {
            CounterCompletion::Failure(
                transition
                    .failure
                    .unwrap_or_else(|| ErrorDetail::new("subtask failed")),
            )
        } else {
            CounterCompletion::Success
        };
        self.complete(&TaskLink::new(link), completion).await
    }
}
