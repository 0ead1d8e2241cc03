//! Placement task: selects concrete hosts for a resource request.
//!
//! CREATED queries host descriptions compatible with the requested
//! resource kind, then powered-on hosts of those descriptions within
//! the resource pool scope, retrying a fixed budget with fixed backoff
//! when zero hosts are found. FILTER runs the selection pipeline.
//! COMPLETED emits a host selection list sized exactly to the requested
//! resource count, cycling a shuffled set when it is undersized.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use stevedore_core::{
    HostDescription, HostSelection, HostState, PoolLink, ResourceDescription, SubStage,
    TaskRecord, ValidationError,
};
use stevedore_engine::{TaskEngine, TaskFailure, TaskWorkflow};
use stevedore_store::{collect_documents, Clause, DocumentQuery, DocumentStore};

use crate::config::SchedulerConfig;
use crate::filter::{FilterError, HostFilterPipeline};

/// Factory link placement task records live under.
pub const PLACEMENT_FACTORY_LINK: &str = "/requests/placement-tasks";

/// Placement task sub-stages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementSubStage {
    #[default]
    Created,
    Filter,
    Completed,
    Error,
}

impl SubStage for PlacementSubStage {
    fn all() -> &'static [Self] {
        &[Self::Created, Self::Filter, Self::Completed, Self::Error]
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

/// Placement task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementTaskState {
    /// The description that defines the requested resource.
    pub resource_description_link: String,

    /// Type of resource to place.
    pub resource_type: String,

    /// Number of resources to place.
    pub resource_count: u64,

    /// The resource pools to select hosts from.
    pub resource_pool_links: Vec<PoolLink>,

    /// The overall context id of the request; shared across the
    /// requests of one composite allocation.
    pub context_id: String,

    /// Set by the task: queried candidates handed to the filter stage.
    #[serde(default)]
    pub candidate_hosts: Option<Vec<HostSelection>>,

    /// Set by the task as result of the selection algorithm filters.
    #[serde(default)]
    pub host_selections: Option<Vec<HostSelection>>,
}

/// Context shared by all placement task instances.
pub struct PlacementContext {
    /// Scheduler configuration.
    pub config: SchedulerConfig,
}

/// The placement workflow.
pub struct PlacementTask;

#[async_trait]
impl TaskWorkflow for PlacementTask {
    type SubStage = PlacementSubStage;
    type Payload = PlacementTaskState;
    type Context = PlacementContext;

    const KIND: &'static str = "placement-task";
    const FACTORY_LINK: &'static str = PLACEMENT_FACTORY_LINK;
    const DISPLAY_NAME: &'static str = "Host Selection";

    fn validate(payload: &Self::Payload) -> Result<(), ValidationError> {
        if payload.resource_type.is_empty() {
            return Err(ValidationError::MissingField("resource_type"));
        }
        if payload.context_id.is_empty() {
            return Err(ValidationError::MissingField("context_id"));
        }
        if payload.resource_pool_links.is_empty() {
            return Err(ValidationError::MissingField("resource_pool_links"));
        }
        if payload.resource_description_link.is_empty() {
            return Err(ValidationError::MissingField("resource_description_link"));
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
            PlacementSubStage::Created => select_candidate_hosts(engine, record).await,
            PlacementSubStage::Filter => filter_and_complete(engine, record).await,
            // terminal sub-stages are finalized by the engine
            PlacementSubStage::Completed | PlacementSubStage::Error => Ok(()),
        }
    }

    fn finished_response(record: &TaskRecord<Self::SubStage, Self::Payload>) -> Value {
        json!({ "host_selections": record.payload.host_selections })
    }
}

/// Query compatible host descriptions and their powered-on hosts in
/// the pool scope, and hand the candidate set to the filter stage.
async fn select_candidate_hosts(
    engine: &Arc<TaskEngine<PlacementTask>>,
    record: &TaskRecord<PlacementSubStage, PlacementTaskState>,
) -> Result<(), TaskFailure> {
    let state = &record.payload;
    // per-run memoization: the description is read once and threaded
    // through this handler invocation
    let description = get_resource_description(engine.store(), &state.resource_description_link)
        .await?;

    let mut description_query = DocumentQuery::for_kind(HostDescription::KIND)
        .with_clause(Clause::Contains {
            field: "supported_resource_kinds".into(),
            value: json!(state.resource_type),
        })
        .expand();
    if let Some(zone_id) = &description.zone_id {
        description_query = description_query.with_clause(Clause::Term {
            field: "zone_id".into(),
            value: json!(zone_id),
        });
    }
    let description_docs = collect_documents(engine.store().query(description_query).await)
        .await
        .map_err(|e| TaskFailure::with_source("Error querying for placement host descriptions", e))?;
    if description_docs.is_empty() {
        return Err(TaskFailure::new(format!(
            "Available host description not found supporting the type: {}",
            state.resource_type
        )));
    }
    let descriptions: HashMap<String, HostDescription> = description_docs
        .iter()
        .map(|doc| doc.parse::<HostDescription>().map(|d| (doc.self_link.clone(), d)))
        .collect::<Result<_, _>>()
        .map_err(TaskFailure::from)?;

    let config = &engine.context().config;
    let mut retries_left = config.query_retry_count;
    loop {
        let host_query = DocumentQuery::for_kind(HostState::KIND)
            .with_clause(Clause::In {
                field: "description_link".into(),
                values: descriptions.keys().map(|k| json!(k)).collect(),
            })
            .with_clause(Clause::Term {
                field: "power_state".into(),
                value: json!("ON"),
            })
            .with_clause(Clause::AnyOf(
                state
                    .resource_pool_links
                    .iter()
                    .map(|pool| Clause::Contains {
                        field: "resource_pool_links".into(),
                        value: json!(pool),
                    })
                    .collect(),
            ))
            .expand();
        let host_docs = collect_documents(engine.store().query(host_query).await)
            .await
            .map_err(|e| TaskFailure::with_source("Error querying for placement hosts", e))?;

        if host_docs.is_empty() {
            if retries_left > 0 {
                retries_left -= 1;
                debug!(
                    task = %record.self_link,
                    retries_left,
                    "No powered-on hosts found, backing off"
                );
                tokio::time::sleep(config.query_retry_interval).await;
                continue;
            }
            return Err(TaskFailure::new(format!(
                "Container host not found in resource pools: {:?}",
                state.resource_pool_links
            )));
        }

        let mut candidates = Vec::with_capacity(host_docs.len());
        for doc in &host_docs {
            let host: HostState = doc.parse().map_err(TaskFailure::from)?;
            if let Some(description) = descriptions.get(&host.description_link) {
                candidates.push(HostSelection::from_host(&host, description));
            }
        }
        info!(
            task = %record.self_link,
            candidates = candidates.len(),
            "Queried placement candidates"
        );
        engine
            .proceed_to(
                &record.self_link,
                PlacementSubStage::Filter,
                json!({ "candidate_hosts": candidates }),
            )
            .await;
        return Ok(());
    }
}

/// Run the filter pipeline and emit the sized host selection list.
async fn filter_and_complete(
    engine: &Arc<TaskEngine<PlacementTask>>,
    record: &TaskRecord<PlacementSubStage, PlacementTaskState>,
) -> Result<(), TaskFailure> {
    let state = &record.payload;
    let description = get_resource_description(engine.store(), &state.resource_description_link)
        .await?;
    let candidates = state.candidate_hosts.clone().unwrap_or_default();

    let pipeline = HostFilterPipeline::build(
        engine.store().clone(),
        &description,
        &state.resource_type,
        &state.context_id,
    );
    let filtered = match pipeline.run(candidates).await {
        Ok(filtered) => filtered,
        // the constraint's own message is surfaced verbatim
        Err(FilterError::Selection(message)) => return Err(TaskFailure::new(message)),
        Err(err) => return Err(TaskFailure::new(err.to_string())),
    };

    let selections = size_to_count(filtered, state.resource_count as usize);
    engine
        .complete_with(
            &record.self_link,
            json!({ "host_selections": selections }),
            Default::default(),
        )
        .await;
    Ok(())
}

/// Shuffle for fairness, then cycle the sequence (truncating the final
/// repetition) until the list has exactly `count` entries. An
/// oversized set is truncated after the shuffle.
fn size_to_count(mut hosts: Vec<HostSelection>, count: usize) -> Vec<HostSelection> {
    hosts.shuffle(&mut rand::thread_rng());
    if hosts.len() >= count {
        hosts.truncate(count);
        return hosts;
    }
    let base = hosts.clone();
    while hosts.len() < count {
        let take = (count - hosts.len()).min(base.len());
        hosts.extend_from_slice(&base[..take]);
    }
    hosts
}

pub(crate) async fn get_resource_description(
    store: &Arc<dyn DocumentStore>,
    link: &str,
) -> Result<ResourceDescription, TaskFailure> {
    let document = store
        .get(link)
        .await
        .map_err(|e| TaskFailure::with_source("Failure retrieving description state", e))?;
    document.parse().map_err(TaskFailure::from)
}
