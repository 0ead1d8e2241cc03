//! The task engine: transition application and handler dispatch.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use stevedore_core::{ErrorDetail, SubStage, TaskLink, TaskRecord, TaskStage};
use stevedore_store::{Document, DocumentStore};

use crate::callback::{CallbackOutcome, ServiceCallback};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::registry::{TaskEndpoint, TaskRegistry};
use crate::status::TaskStatusState;
use crate::transition::{parse_sub_stage, sub_stage_name, TaskTransition};
use crate::workflow::{CreateRequest, TaskWorkflow};

/// How an incoming transition request is treated.
enum Disposition<S> {
    /// Apply the transition to the given sub-stage.
    Accept(S),
    /// Drop the transition as already superseded; not an error.
    Ignore(&'static str),
    /// Reject the transition as invalid.
    Reject(EngineError),
}

/// Generic task engine for one workflow type.
///
/// The engine persists records through the document store, validates
/// and applies transition requests under optimistic concurrency
/// (retrying the read-mutate-write cycle internally on version
/// conflicts), invokes the workflow handler once per settled sub-stage
/// and runs finalization for terminal stages.
pub struct TaskEngine<W: TaskWorkflow> {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TaskRegistry>,
    config: EngineConfig,
    context: W::Context,
    weak_self: Weak<Self>,
}

impl<W: TaskWorkflow> TaskEngine<W> {
    /// Create an engine and register it for callback routing under the
    /// workflow's factory link.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: &Arc<TaskRegistry>,
        config: EngineConfig,
        context: W::Context,
    ) -> Arc<Self> {
        let engine = Arc::new_cyclic(|weak_self| Self {
            store,
            registry: registry.clone(),
            config,
            context,
            weak_self: weak_self.clone(),
        });
        registry.register(W::FACTORY_LINK, engine.clone());
        engine
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The workflow context.
    pub fn context(&self) -> &W::Context {
        &self.context
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate the payload, persist a CREATED record and immediately
    /// apply the first self-transition to STARTED.
    pub async fn create(
        &self,
        request: CreateRequest<W>,
    ) -> Result<TaskRecord<W::SubStage, W::Payload>, EngineError> {
        W::validate(&request.payload)?;

        let self_link = request
            .self_link
            .unwrap_or_else(|| TaskLink::generate_under(W::FACTORY_LINK));
        let ttl = Duration::seconds(self.config.task_ttl.as_secs() as i64);
        let mut record: TaskRecord<W::SubStage, W::Payload> =
            TaskRecord::new(self_link.clone(), request.payload, Utc::now() + ttl);
        record.callback = request.callback;
        record.tenant_links = request.tenant_links;
        record.custom_properties = request.custom_properties;
        record.tracker_link = request.tracker_link;

        if let Some(callback) = &record.callback {
            info!(
                task = %self_link,
                parent = %callback.target_link,
                "Starting task with parent link"
            );
        }

        self.store
            .create(W::KIND, self_link.as_str(), serde_json::to_value(&record)?)
            .await?;

        let started = TaskTransition::to(
            TaskStage::Started,
            sub_stage_name(W::SubStage::created())?,
        );
        match self.apply_transition(self_link.as_str(), started).await? {
            Some(record) => Ok(record),
            None => Ok(record),
        }
    }

    /// Re-dispatch the handler for a record's current sub-stage. The
    /// crash recovery pass: transient sub-stages re-issue their
    /// side-effecting action, settled ones fall through as no-ops when
    /// their follow-up transitions turn out stale.
    pub async fn resume(&self, self_link: &TaskLink) -> Result<(), EngineError> {
        let document = self.store.get(self_link.as_str()).await?;
        let record = self.parse_record(&document)?;
        match record.stage {
            TaskStage::Created => {
                info!(task = %self_link, "Restarting task from CREATED");
                let started = TaskTransition::to(
                    TaskStage::Started,
                    sub_stage_name(record.sub_stage)?,
                );
                self.apply_transition(self_link.as_str(), started).await?;
            }
            TaskStage::Started => {
                info!(task = %self_link, sub_stage = ?record.sub_stage, "Restarting task");
                self.dispatch(record);
            }
            // the task should not restart in a terminal stage
            _ => {}
        }
        Ok(())
    }

    /// Validate and apply a transition request.
    ///
    /// Returns the persisted record when the transition was applied,
    /// `None` when it was dropped as superseded. Version conflicts are
    /// retried internally by re-reading and re-validating; a transition
    /// made stale by the conflicting writer degrades to a no-op instead
    /// of surfacing the conflict.
    pub async fn apply_transition(
        &self,
        link: &str,
        transition: TaskTransition,
    ) -> Result<Option<TaskRecord<W::SubStage, W::Payload>>, EngineError> {
        loop {
            let document = self.store.get(link).await?;
            let record = self.parse_record(&document)?;

            let target = match self.validate_transition(&record, &transition) {
                Disposition::Accept(target) => target,
                Disposition::Ignore(reason) => {
                    debug!(task = %link, reason, "Dropping superseded transition");
                    return Ok(None);
                }
                Disposition::Reject(err) => {
                    warn!(
                        task = %link,
                        from = %record.stage,
                        sub_stage = ?record.sub_stage,
                        to = %transition.stage,
                        "Rejecting transition: {}",
                        err
                    );
                    return Err(err);
                }
            };

            let mut next = record.clone();
            next.stage = if transition.failure.is_some() {
                TaskStage::Failed
            } else {
                transition.stage
            };
            next.sub_stage = target;
            if let Some(failure) = &transition.failure {
                next.failure = Some(failure.clone());
            }
            for (key, value) in &transition.custom_properties {
                next.custom_properties.insert(key.clone(), value.clone());
            }
            self.merge_payload(&mut next, &transition.patch)?;
            W::merge_transition(&mut next, &transition, target);

            match self
                .store
                .update(link, record.version, serde_json::to_value(&next)?)
                .await
            {
                Ok(document) => {
                    next.version = document.version;
                    info!(
                        task = %link,
                        "Moving from {}({:?}) to {}({:?})",
                        record.stage,
                        record.sub_stage,
                        next.stage,
                        next.sub_stage
                    );
                    self.spawn_tracker_update(&next);
                    self.dispatch(next.clone());
                    return Ok(Some(next));
                }
                Err(err) if err.is_conflict() => {
                    debug!(task = %link, "Version conflict applying transition, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Move the task to the given sub-stage within STARTED. Failures
    /// are logged; the owning handler has no recovery beyond retrying.
    pub async fn proceed_to(&self, self_link: &TaskLink, sub_stage: W::SubStage, patch: Value) {
        let transition = match sub_stage_name(sub_stage) {
            Ok(name) => TaskTransition::to(TaskStage::Started, name).with_patch(patch),
            Err(err) => {
                warn!(task = %self_link, error = %err, "Sub-stage name serialization failed");
                return;
            }
        };
        if let Err(err) = self.apply_transition(self_link.as_str(), transition).await {
            warn!(
                task = %self_link,
                error = %err,
                "Moving task to {:?} failed",
                sub_stage
            );
        }
    }

    /// Complete the task: FINISHED stage, COMPLETED sub-stage.
    pub async fn complete_with(
        &self,
        self_link: &TaskLink,
        patch: Value,
        custom_properties: std::collections::HashMap<String, String>,
    ) {
        let transition = match sub_stage_name(W::SubStage::completed()) {
            Ok(name) => TaskTransition::to(TaskStage::Finished, name)
                .with_patch(patch)
                .with_custom_properties(custom_properties),
            Err(err) => {
                warn!(task = %self_link, error = %err, "Sub-stage name serialization failed");
                return;
            }
        };
        if let Err(err) = self.apply_transition(self_link.as_str(), transition).await {
            warn!(task = %self_link, error = %err, "Completing task failed");
        }
    }

    /// Complete the task with no result payload.
    pub async fn complete(&self, self_link: &TaskLink) {
        self.complete_with(self_link, Value::Null, Default::default())
            .await;
    }

    /// Fail the task with a structured error: FAILED stage, ERROR
    /// sub-stage. The only path by which a record enters ERROR.
    pub async fn fail_task(&self, self_link: &TaskLink, message: impl Into<String>) {
        let message = message.into();
        warn!(task = %self_link, "{}", message);
        let transition = match sub_stage_name(W::SubStage::error()) {
            Ok(name) => TaskTransition::to(TaskStage::Failed, name)
                .with_failure(ErrorDetail::new(message)),
            Err(err) => {
                warn!(task = %self_link, error = %err, "Sub-stage name serialization failed");
                return;
            }
        };
        if let Err(err) = self.apply_transition(self_link.as_str(), transition).await {
            warn!(task = %self_link, error = %err, "Self patch to error sub-stage failed");
        }
    }

    fn parse_record(
        &self,
        document: &Document,
    ) -> Result<TaskRecord<W::SubStage, W::Payload>, EngineError> {
        let mut record: TaskRecord<W::SubStage, W::Payload> = document.parse()?;
        record.version = document.version;
        Ok(record)
    }

    fn validate_transition(
        &self,
        record: &TaskRecord<W::SubStage, W::Payload>,
        transition: &TaskTransition,
    ) -> Disposition<W::SubStage> {
        let target: W::SubStage = match parse_sub_stage(&transition.sub_stage) {
            Ok(target) => target,
            Err(err) => return Disposition::Reject(err),
        };

        if record.stage.is_terminal() {
            if transition.failure.is_some() && record.stage == TaskStage::Failed {
                return Disposition::Ignore("task already failed");
            }
            return Disposition::Ignore("no transitions accepted in a terminal stage");
        }

        let effective_stage = if transition.failure.is_some() {
            TaskStage::Failed
        } else {
            transition.stage
        };
        if effective_stage < record.stage {
            return Disposition::Reject(EngineError::StageRegression {
                from: record.stage,
                to: effective_stage,
            });
        }

        if target < record.sub_stage {
            if effective_stage == record.stage && !target.is_transient() {
                return Disposition::Reject(EngineError::SubStageRegression {
                    from: format!("{:?}", record.sub_stage),
                    to: transition.sub_stage.clone(),
                });
            }
            return Disposition::Ignore("sub-stage already advanced");
        }

        Disposition::Accept(target)
    }

    /// Field-by-field merge of a patch object into the payload,
    /// skipping null fields.
    fn merge_payload(
        &self,
        record: &mut TaskRecord<W::SubStage, W::Payload>,
        patch: &Value,
    ) -> Result<(), EngineError> {
        let Some(patch_fields) = patch.as_object() else {
            return Ok(());
        };
        let mut payload = serde_json::to_value(&record.payload)?;
        if let Some(fields) = payload.as_object_mut() {
            for (key, value) in patch_fields {
                if !value.is_null() {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
        record.payload = serde_json::from_value(payload)?;
        Ok(())
    }

    /// Invoke the stage handler (or finalization) for a settled record
    /// on a fresh task, never blocking the transition that settled it.
    fn dispatch(&self, record: TaskRecord<W::SubStage, W::Payload>) {
        let Some(engine) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            engine.handle_settled(record).await;
        });
    }

    async fn handle_settled(self: Arc<Self>, record: TaskRecord<W::SubStage, W::Payload>) {
        match record.stage {
            // creation is driven explicitly by `create`
            TaskStage::Created => {}
            TaskStage::Started => {
                if record.sub_stage == W::SubStage::completed() {
                    // finalization hook: a task driven to its terminal
                    // success sub-stage is marked FINISHED
                    self.complete(&record.self_link).await;
                } else if record.sub_stage == W::SubStage::error() {
                    let message = record
                        .failure
                        .as_ref()
                        .map(|f| f.message.clone())
                        .unwrap_or_else(|| "Unexpected State".to_owned());
                    self.fail_task(&record.self_link, message).await;
                } else if let Err(failure) = W::handle_sub_stage(&self, &record).await {
                    self.fail_task(&record.self_link, failure.message).await;
                }
            }
            TaskStage::Finished => self.finalize(record, true).await,
            TaskStage::Failed => self.finalize(record, false).await,
            // no callback on cancellation
            TaskStage::Cancelled => {}
        }
    }

    /// Terminal-stage finalization: notify the caller, push the final
    /// tracker update, self-delete when the workflow opted in.
    async fn finalize(&self, record: TaskRecord<W::SubStage, W::Payload>, success: bool) {
        if !success {
            let message = record
                .failure
                .as_ref()
                .map(|f| f.message.as_str())
                .unwrap_or("n.a.");
            warn!(task = %record.self_link, "Task failed with: {}", message);
        }

        if let Some(descriptor) = &record.callback {
            let outcome = if success {
                CallbackOutcome::success(
                    W::finished_response(&record),
                    record.custom_properties.clone(),
                )
            } else {
                CallbackOutcome::failure(
                    record
                        .failure
                        .clone()
                        .unwrap_or_else(|| ErrorDetail::new("task failed")),
                    W::failed_response(&record),
                    record.custom_properties.clone(),
                )
            };
            ServiceCallback::new(self.registry.clone())
                .fire(descriptor, outcome)
                .await;
        }

        self.update_tracker(&record, self.config.tracker_retry_count)
            .await;

        if W::SELF_DELETE {
            debug!(task = %record.self_link, "Self deleting completed task");
            if let Err(err) = self.store.delete(record.self_link.as_str()).await {
                warn!(task = %record.self_link, error = %err, "Self delete failed");
            }
        }
    }

    fn spawn_tracker_update(&self, record: &TaskRecord<W::SubStage, W::Payload>) {
        if record.tracker_link.is_none() || record.stage.is_terminal() {
            // terminal updates run inside finalization with retries
            return;
        }
        let Some(engine) = self.weak_self.upgrade() else {
            return;
        };
        let record = record.clone();
        tokio::spawn(async move {
            engine.update_tracker(&record, 0).await;
        });
    }

    /// Upsert the request status document. Failures are logged and
    /// never fail the task.
    async fn update_tracker(&self, record: &TaskRecord<W::SubStage, W::Payload>, retries: u32) {
        let Some(tracker_link) = &record.tracker_link else {
            return;
        };
        let status = TaskStatusState::from_record::<W>(record);
        let body = match serde_json::to_value(&status) {
            Ok(body) => body,
            Err(err) => {
                warn!(tracker = %tracker_link, error = %err, "Status serialization failed");
                return;
            }
        };

        for _ in 0..=retries {
            let result = match self.store.get(tracker_link).await {
                Ok(document) => {
                    self.store
                        .update(tracker_link, document.version, body.clone())
                        .await
                }
                Err(stevedore_store::StoreError::NotFound(_)) => {
                    self.store
                        .create(TaskStatusState::KIND, tracker_link, body.clone())
                        .await
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(_) => return,
                Err(err) if err.is_conflict() => continue,
                Err(stevedore_store::StoreError::AlreadyExists(_)) => continue,
                Err(err) => {
                    warn!(tracker = %tracker_link, error = %err, "Failed to update request tracker");
                    return;
                }
            }
        }
        warn!(tracker = %tracker_link, "Failed to update request tracker: retries exhausted");
    }
}

#[async_trait]
impl<W: TaskWorkflow> TaskEndpoint for TaskEngine<W> {
    async fn patch(&self, link: &str, transition: TaskTransition) -> Result<(), EngineError> {
        self.apply_transition(link, transition).await.map(|_| ())
    }
}
