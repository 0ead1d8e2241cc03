//! Reservation task: allocates capacity from prioritized group
//! placements.
//!
//! CREATED queries group placements with capacity for the request in
//! the tenant scope, retrying on a fixed budget and escalating to
//! global scope on exhaustion. SELECTED drives a fresh placement child
//! task over the union of candidate pools. HOSTS_SELECTED drops
//! candidates whose pool contributed no selected host.
//! RESERVATION_SELECTED attempts one atomic reservation at a time in
//! ascending priority order, advancing to the next candidate on
//! conflict or capacity failure - the store's single-document
//! optimistic concurrency is the only synchronization primitive.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use stevedore_core::{
    CallbackDescriptor, GroupPlacementState, HostSelection, PlacementCandidate, PlacementLink,
    PoolLink, ResourceDescription, StagePair, SubStage, TaskLink, TaskRecord, TaskStage,
    ValidationError,
};
use stevedore_engine::{
    sub_stage_name, CreateRequest, EngineError, TaskEngine, TaskFailure, TaskTransition,
    TaskWorkflow,
};
use stevedore_store::{collect_documents, Clause, DocumentQuery, DocumentStore, StoreError};

use crate::config::SchedulerConfig;
use crate::placement::{
    get_resource_description, PlacementTask, PlacementTaskState, PLACEMENT_FACTORY_LINK,
};

/// Factory link reservation task records live under.
pub const RESERVATION_FACTORY_LINK: &str = "/requests/reservation-tasks";

/// Failure message when no placement can satisfy the request.
pub const NO_PLACEMENTS_AVAILABLE: &str = "No available group placements.";

/// Reservation task sub-stages. The `*_GLOBAL` run repeats the
/// selection with the tenant scope cleared.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationSubStage {
    #[default]
    Created,
    Selected,
    Placement,
    HostsSelected,
    QueryingGlobal,
    SelectedGlobal,
    PlacementGlobal,
    HostsSelectedGlobal,
    ReservationSelected,
    Completed,
    Error,
}

impl SubStage for ReservationSubStage {
    fn all() -> &'static [Self] {
        &[
            Self::Created,
            Self::Selected,
            Self::Placement,
            Self::HostsSelected,
            Self::QueryingGlobal,
            Self::SelectedGlobal,
            Self::PlacementGlobal,
            Self::HostsSelectedGlobal,
            Self::ReservationSelected,
            Self::Completed,
            Self::Error,
        ]
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

    fn is_transient(self) -> bool {
        // a placement child is in flight: crash recovery re-issues the
        // child creation instead of treating the sub-stage as complete
        matches!(self, Self::Placement | Self::PlacementGlobal)
    }
}

/// Reservation task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationTaskState {
    /// The description that defines the requested resource.
    pub resource_description_link: String,

    /// Type of resource to reserve capacity for.
    pub resource_type: String,

    /// Number of resources to reserve.
    pub resource_count: u64,

    /// The overall context id of the request.
    #[serde(default)]
    pub context_id: String,

    /// Set by the task: the placement the reservation was made against.
    #[serde(default)]
    pub group_placement_link: Option<PlacementLink>,

    /// Set by the task: remaining candidates ordered by ascending
    /// priority.
    #[serde(default)]
    pub placement_candidates: Option<Vec<PlacementCandidate>>,

    /// Set by the placement child via callback.
    #[serde(default)]
    pub host_selections: Option<Vec<HostSelection>>,
}

/// Context shared by all reservation task instances.
pub struct ReservationContext {
    /// Scheduler configuration.
    pub config: SchedulerConfig,

    /// Engine driving placement child tasks.
    pub placements: Arc<TaskEngine<PlacementTask>>,
}

/// The reservation workflow.
pub struct ReservationTask;

#[async_trait]
impl TaskWorkflow for ReservationTask {
    type SubStage = ReservationSubStage;
    type Payload = ReservationTaskState;
    type Context = ReservationContext;

    const KIND: &'static str = "reservation-task";
    const FACTORY_LINK: &'static str = RESERVATION_FACTORY_LINK;
    const DISPLAY_NAME: &'static str = "Reservation";

    fn validate(payload: &Self::Payload) -> Result<(), ValidationError> {
        if payload.resource_description_link.is_empty() {
            return Err(ValidationError::MissingField("resource_description_link"));
        }
        if payload.resource_type.is_empty() {
            return Err(ValidationError::MissingField("resource_type"));
        }
        if payload.resource_count < 1 {
            return Err(ValidationError::NonPositiveCount("resource_count"));
        }
        Ok(())
    }

    async fn handle_sub_stage(
        engine: &Arc<TaskEngine<Self>>,
        record: &TaskRecord<Self::SubStage, Self::Payload>,
    ) -> Result<(), TaskFailure> {
        match record.sub_stage {
            ReservationSubStage::Created | ReservationSubStage::QueryingGlobal => {
                query_group_placements(engine, record).await
            }
            ReservationSubStage::Selected | ReservationSubStage::SelectedGlobal => {
                create_placement_child(engine, record).await
            }
            // awaiting the placement child's callback
            ReservationSubStage::Placement | ReservationSubStage::PlacementGlobal => Ok(()),
            ReservationSubStage::HostsSelected | ReservationSubStage::HostsSelectedGlobal => {
                hosts_selected(engine, record).await
            }
            ReservationSubStage::ReservationSelected => make_reservation(engine, record).await,
            // terminal sub-stages are finalized by the engine
            ReservationSubStage::Completed | ReservationSubStage::Error => Ok(()),
        }
    }

    fn merge_transition(
        record: &mut TaskRecord<Self::SubStage, Self::Payload>,
        _transition: &TaskTransition,
        target: Self::SubStage,
    ) {
        // escalation widens the scope to global on the task's own record
        if target == ReservationSubStage::QueryingGlobal {
            record.tenant_links.clear();
        }
    }

    fn finished_response(record: &TaskRecord<Self::SubStage, Self::Payload>) -> Value {
        json!({ "group_placement_link": record.payload.group_placement_link })
    }
}

fn is_global(record: &TaskRecord<ReservationSubStage, ReservationTaskState>) -> bool {
    record.sub_stage >= ReservationSubStage::QueryingGlobal
}

fn context_id(record: &TaskRecord<ReservationSubStage, ReservationTaskState>) -> String {
    if record.payload.context_id.is_empty() {
        record.self_link.id().to_owned()
    } else {
        record.payload.context_id.clone()
    }
}

/// Query group placements with capacity for the request, ordered by
/// ascending priority, preferring deployment-policy matches.
async fn query_group_placements(
    engine: &Arc<TaskEngine<ReservationTask>>,
    record: &TaskRecord<ReservationSubStage, ReservationTaskState>,
) -> Result<(), TaskFailure> {
    let state = &record.payload;
    let description = get_resource_description(engine.store(), &state.resource_description_link)
        .await?;
    let config = &engine.context().config;

    let mut retries_left = config.query_retry_count;
    loop {
        let mut query = DocumentQuery::for_kind(GroupPlacementState::KIND)
            .with_clause(Clause::Term {
                field: "resource_type".into(),
                value: json!(state.resource_type),
            })
            .with_clause(capacity_clause(state.resource_count))
            .expand();

        if record.tenant_links.is_empty() {
            info!(
                task = %record.self_link,
                description = %state.resource_description_link,
                count = state.resource_count,
                "Querying for global placements"
            );
            // global placements carry no tenant scope
            query = query.with_clause(Clause::Term {
                field: "tenant_links".into(),
                value: json!([]),
            });
        } else {
            info!(
                task = %record.self_link,
                tenants = ?record.tenant_links,
                description = %state.resource_description_link,
                count = state.resource_count,
                "Querying for group placements"
            );
            query = query.with_clause(Clause::AnyOf(
                record
                    .tenant_links
                    .iter()
                    .map(|tenant| Clause::Contains {
                        field: "tenant_links".into(),
                        value: json!(tenant),
                    })
                    .collect(),
            ));
        }

        if description.memory_limit != 0 {
            info!(
                task = %record.self_link,
                memory_limit = description.memory_limit,
                "Placement query includes memory limit"
            );
            query = query.with_clause(Clause::AnyOf(vec![
                Clause::Range {
                    field: "available_memory".into(),
                    min: Some((state.resource_count * description.memory_limit) as i64),
                    max: None,
                },
                Clause::Term {
                    field: "memory_limit".into(),
                    value: json!(0),
                },
            ]));
        }

        let placements: Vec<GroupPlacementState> =
            collect_documents(engine.store().query(query).await)
                .await
                .map_err(|e| TaskFailure::with_source("Exception while querying for placements", e))?
                .iter()
                .map(|doc| doc.parse())
                .collect::<Result<_, _>>()
                .map_err(TaskFailure::from)?;

        if placements.is_empty() {
            if retries_left > 0 {
                retries_left -= 1;
                debug!(task = %record.self_link, retries_left, "No placements found, backing off");
                tokio::time::sleep(config.query_retry_interval).await;
                continue;
            }
            if !record.tenant_links.is_empty() {
                // tenant scope exhausted - escalate to global
                engine
                    .proceed_to(
                        &record.self_link,
                        ReservationSubStage::QueryingGlobal,
                        Value::Null,
                    )
                    .await;
                return Ok(());
            }
            return Err(TaskFailure::new(NO_PLACEMENTS_AVAILABLE));
        }

        let candidates = build_candidates(&description, placements);
        let target = if is_global(record) {
            ReservationSubStage::SelectedGlobal
        } else {
            ReservationSubStage::Selected
        };
        engine
            .proceed_to(
                &record.self_link,
                target,
                json!({ "placement_candidates": candidates }),
            )
            .await;
        return Ok(());
    }
}

/// Capacity predicate: available instances cover the count, or the
/// placement is unlimited.
fn capacity_clause(resource_count: u64) -> Clause {
    Clause::AnyOf(vec![
        Clause::Range {
            field: "available_instances".into(),
            min: Some(resource_count as i64),
            max: None,
        },
        Clause::Term {
            field: "max_instances".into(),
            value: json!(0),
        },
    ])
}

/// Order candidates by ascending priority, preferring placements that
/// advertise the description's deployment policy and falling back to
/// the unfiltered set when none match.
fn build_candidates(
    description: &ResourceDescription,
    placements: Vec<GroupPlacementState>,
) -> Vec<PlacementCandidate> {
    let mut filtered: Vec<&GroupPlacementState> = match &description.deployment_policy_id {
        Some(policy_id) if !policy_id.is_empty() => placements
            .iter()
            .filter(|p| {
                p.deployment_policy_link
                    .as_deref()
                    .map(|link| link.ends_with(policy_id.as_str()))
                    .unwrap_or(false)
            })
            .collect(),
        _ => Vec::new(),
    };
    if filtered.is_empty() {
        filtered = placements.iter().collect();
    }
    filtered.sort_by_key(|p| p.priority);

    filtered
        .iter()
        .map(|placement| {
            info!(
                placement = %placement.self_link,
                available_instances = placement.available_instances,
                available_memory = placement.available_memory,
                "Placement found"
            );
            PlacementCandidate {
                placement_link: placement.self_link.clone(),
                resource_pool_link: placement.resource_pool_link.clone(),
                priority: placement.priority,
            }
        })
        .collect()
}

/// Drive a fresh placement child over the union of candidate pools.
/// Escalation never re-scopes an in-flight run: each attempt creates a
/// new record under its own deterministic link.
async fn create_placement_child(
    engine: &Arc<TaskEngine<ReservationTask>>,
    record: &TaskRecord<ReservationSubStage, ReservationTaskState>,
) -> Result<(), TaskFailure> {
    let state = &record.payload;
    let global = is_global(record);

    let mut pools: Vec<PoolLink> = Vec::new();
    for candidate in state.placement_candidates.iter().flatten() {
        if !pools.contains(&candidate.resource_pool_link) {
            pools.push(candidate.resource_pool_link.clone());
        }
    }

    let suffix = if global {
        "-reservation-global"
    } else {
        "-reservation"
    };
    let child_link = TaskLink::under(
        PLACEMENT_FACTORY_LINK,
        format!("{}{}", record.self_link.id(), suffix),
    );

    let on_success = if global {
        ReservationSubStage::HostsSelectedGlobal
    } else {
        ReservationSubStage::HostsSelected
    };
    let callback = CallbackDescriptor::new(
        record.self_link.clone(),
        StagePair::new(TaskStage::Started, sub_stage_name(on_success)?),
        StagePair::new(
            TaskStage::Started,
            sub_stage_name(ReservationSubStage::Error)?,
        ),
    );

    let request = CreateRequest::<PlacementTask>::new(PlacementTaskState {
        resource_description_link: state.resource_description_link.clone(),
        resource_type: state.resource_type.clone(),
        resource_count: state.resource_count,
        resource_pool_links: pools,
        context_id: context_id(record),
        candidate_hosts: None,
        host_selections: None,
    })
    .with_self_link(child_link)
    .with_callback(callback)
    .with_tenant_links(record.tenant_links.clone());

    match engine.context().placements.create(request).await {
        Ok(_) => {}
        // crash replay of a transient sub-stage re-issues the creation
        Err(EngineError::Store(StoreError::AlreadyExists(link))) => {
            debug!(task = %record.self_link, child = %link, "Placement child already exists");
        }
        Err(err) => {
            return Err(TaskFailure::with_source(
                "Failure creating placement task",
                err,
            ))
        }
    }

    let target = if global {
        ReservationSubStage::PlacementGlobal
    } else {
        ReservationSubStage::Placement
    };
    engine.proceed_to(&record.self_link, target, Value::Null).await;
    Ok(())
}

/// Keep only candidates whose backing pool contributed a selected
/// host, then pop the highest-priority one for reservation.
async fn hosts_selected(
    engine: &Arc<TaskEngine<ReservationTask>>,
    record: &TaskRecord<ReservationSubStage, ReservationTaskState>,
) -> Result<(), TaskFailure> {
    let state = &record.payload;
    let selections = state.host_selections.clone().unwrap_or_default();
    if selections.is_empty() {
        if !record.tenant_links.is_empty() {
            engine
                .proceed_to(
                    &record.self_link,
                    ReservationSubStage::QueryingGlobal,
                    Value::Null,
                )
                .await;
            return Ok(());
        }
        return Err(TaskFailure::new("Available compute host can't be selected."));
    }

    let contributing: HashSet<&PoolLink> = selections
        .iter()
        .flat_map(|s| s.resource_pool_links.iter())
        .collect();
    let remaining: Vec<PlacementCandidate> = state
        .placement_candidates
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|candidate| contributing.contains(&candidate.resource_pool_link))
        .collect();

    select_reservation(engine, record, remaining).await
}

/// Pop the highest-priority candidate and move to the reservation
/// attempt. Exhaustion of the candidate list fails the task.
async fn select_reservation(
    engine: &Arc<TaskEngine<ReservationTask>>,
    record: &TaskRecord<ReservationSubStage, ReservationTaskState>,
    mut candidates: Vec<PlacementCandidate>,
) -> Result<(), TaskFailure> {
    if candidates.is_empty() {
        return Err(TaskFailure::new(NO_PLACEMENTS_AVAILABLE));
    }
    let selected = candidates.remove(0);
    info!(
        task = %record.self_link,
        placement = %selected.placement_link,
        "Current selected placement"
    );
    engine
        .proceed_to(
            &record.self_link,
            ReservationSubStage::ReservationSelected,
            json!({
                "group_placement_link": selected.placement_link,
                "placement_candidates": candidates,
            }),
        )
        .await;
    Ok(())
}

enum ReserveAttempt {
    Reserved(GroupPlacementState),
    /// Capacity or concurrency loss on this placement; try the next
    /// candidate without retrying the same pool.
    TryNext(String),
}

/// Attempt the atomic reservation against the selected placement.
async fn make_reservation(
    engine: &Arc<TaskEngine<ReservationTask>>,
    record: &TaskRecord<ReservationSubStage, ReservationTaskState>,
) -> Result<(), TaskFailure> {
    let state = &record.payload;
    let Some(placement_link) = state.group_placement_link.clone() else {
        return Err(TaskFailure::new("No placement selected for reservation"));
    };
    let description = get_resource_description(engine.store(), &state.resource_description_link)
        .await?;

    info!(
        task = %record.self_link,
        placement = %placement_link,
        count = state.resource_count,
        "Reserving instances"
    );

    match try_reserve(
        engine.store(),
        &placement_link,
        state.resource_count,
        description.memory_limit,
    )
    .await?
    {
        ReserveAttempt::Reserved(placement) => {
            engine
                .complete_with(
                    &record.self_link,
                    json!({ "group_placement_link": placement.self_link }),
                    placement.custom_properties.clone(),
                )
                .await;
            Ok(())
        }
        ReserveAttempt::TryNext(reason) => {
            warn!(
                task = %record.self_link,
                placement = %placement_link,
                "Failure reserving group placement: {}. Retrying with the next one...",
                reason
            );
            select_reservation(
                engine,
                record,
                state.placement_candidates.clone().unwrap_or_default(),
            )
            .await
        }
    }
}

async fn try_reserve(
    store: &Arc<dyn DocumentStore>,
    placement_link: &PlacementLink,
    count: u64,
    memory_per_instance: u64,
) -> Result<ReserveAttempt, TaskFailure> {
    let document = match store.get(placement_link.as_str()).await {
        Ok(document) => document,
        Err(StoreError::NotFound(link)) => {
            return Ok(ReserveAttempt::TryNext(format!(
                "placement no longer exists: {}",
                link
            )))
        }
        Err(err) => return Err(TaskFailure::from(err)),
    };
    let mut placement: GroupPlacementState = document.parse().map_err(TaskFailure::from)?;

    if let Err(err) = placement.reserve(count, memory_per_instance) {
        return Ok(ReserveAttempt::TryNext(err.to_string()));
    }

    let body = serde_json::to_value(&placement)
        .map_err(|e| TaskFailure::with_source("placement serialization failed", e))?;
    match store
        .update(placement_link.as_str(), document.version, body)
        .await
    {
        Ok(_) => Ok(ReserveAttempt::Reserved(placement)),
        // another allocator consumed the capacity first
        Err(err) if err.is_conflict() => Ok(ReserveAttempt::TryNext(err.to_string())),
        Err(err) => Err(TaskFailure::from(err)),
    }
}
