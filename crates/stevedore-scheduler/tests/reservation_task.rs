//! Reservation task integration tests: priority ordering, scope
//! escalation and optimistic reservation fall-through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stevedore_core::{
    GroupPlacementState, HostDescription, HostLink, HostState, PlacementCandidate, PlacementLink,
    PoolLink, PowerState, ResourceDescription, TaskLink, TaskRecord, TaskStage,
};
use stevedore_engine::{CreateRequest, EngineConfig, TaskEngine, TaskRegistry, TaskWorkflow};
use stevedore_scheduler::{
    PlacementContext, PlacementTask, ReservationContext, ReservationSubStage, ReservationTask,
    ReservationTaskState, SchedulerConfig,
};
use stevedore_store::{DocumentStore, MemoryDocumentStore};

struct Harness {
    store: Arc<dyn DocumentStore>,
    reservations: Arc<TaskEngine<ReservationTask>>,
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        query_retry_count: 1,
        query_retry_interval: Duration::from_millis(10),
    }
}

fn setup() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let registry = TaskRegistry::new();
    let placements = TaskEngine::<PlacementTask>::new(
        store.clone(),
        &registry,
        EngineConfig::default(),
        PlacementContext {
            config: fast_config(),
        },
    );
    let reservations = TaskEngine::<ReservationTask>::new(
        store.clone(),
        &registry,
        EngineConfig::default(),
        ReservationContext {
            config: fast_config(),
            placements,
        },
    );
    Harness {
        store,
        reservations,
    }
}

async fn seed<T: serde::Serialize>(store: &Arc<dyn DocumentStore>, kind: &str, link: &str, body: &T) {
    store
        .create(kind, link, serde_json::to_value(body).expect("serialize"))
        .await
        .expect("seed document");
}

async fn seed_compute(harness: &Harness, host_link: &str, pool: &str) {
    let description_link = "/resources/host-descriptions/docker";
    if harness.store.get(description_link).await.is_err() {
        let description = HostDescription {
            self_link: description_link.to_owned(),
            supported_resource_kinds: vec!["container".into()],
            zone_id: None,
        };
        seed(&harness.store, HostDescription::KIND, description_link, &description).await;
    }
    let host = HostState {
        self_link: HostLink::new(host_link),
        description_link: description_link.to_owned(),
        resource_pool_links: vec![PoolLink::new(pool)],
        power_state: PowerState::On,
        available_memory: 0,
        deployment_policy_link: None,
        cluster_store: None,
        plugins: None,
        custom_properties: HashMap::new(),
    };
    seed(&harness.store, HostState::KIND, host_link, &host).await;
}

fn group_placement(
    link: &str,
    pool: &str,
    priority: i32,
    available: u64,
    tenants: &[&str],
) -> GroupPlacementState {
    GroupPlacementState {
        self_link: PlacementLink::new(link),
        name: link.to_owned(),
        resource_pool_link: PoolLink::new(pool),
        resource_type: "container".into(),
        priority,
        max_instances: 10,
        available_instances: available,
        allocated_instances: 0,
        memory_limit: 0,
        available_memory: 0,
        deployment_policy_link: None,
        tenant_links: tenants.iter().map(|t| t.to_string()).collect(),
        custom_properties: HashMap::new(),
    }
}

async fn seed_placement(harness: &Harness, placement: &GroupPlacementState) {
    seed(
        &harness.store,
        GroupPlacementState::KIND,
        placement.self_link.as_str(),
        placement,
    )
    .await;
}

fn reservation_request(count: u64) -> ReservationTaskState {
    ReservationTaskState {
        resource_description_link: "/resources/descriptions/app".into(),
        resource_type: "container".into(),
        resource_count: count,
        context_id: "ctx-1".into(),
        group_placement_link: None,
        placement_candidates: None,
        host_selections: None,
    }
}

async fn wait_for_terminal(
    harness: &Harness,
    link: &TaskLink,
) -> TaskRecord<ReservationSubStage, ReservationTaskState> {
    for _ in 0..500 {
        let document = harness.store.get(link.as_str()).await.expect("record");
        let record: TaskRecord<ReservationSubStage, ReservationTaskState> =
            document.parse().expect("record parses");
        if record.stage.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reservation task never settled");
}

async fn placement_state(harness: &Harness, link: &str) -> (GroupPlacementState, u64) {
    let document = harness.store.get(link).await.expect("placement");
    (document.parse().expect("placement parses"), document.version)
}

#[tokio::test]
async fn test_undersized_pool_is_skipped_entirely_for_the_next_priority() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    // priority 1 can only take 2 of the 3 requested units; the count
    // is atomic per pool, so it must fall through entirely
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/p1", "/resources/pools/rp1", 1, 2, &[]),
    )
    .await;
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/p2", "/resources/pools/rp2", 2, 5, &[]),
    )
    .await;
    seed_compute(&harness, "/resources/hosts/h1", "/resources/pools/rp1").await;
    seed_compute(&harness, "/resources/hosts/h2", "/resources/pools/rp2").await;

    let record = harness
        .reservations
        .create(CreateRequest::new(reservation_request(3)))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    assert_eq!(
        finished
            .payload
            .group_placement_link
            .expect("placement selected")
            .as_str(),
        "/resources/group-placements/p2"
    );

    // priority 1 left untouched, priority 2 reserved the whole count
    let (p1, p1_version) = placement_state(&harness, "/resources/group-placements/p1").await;
    assert_eq!(p1.available_instances, 2);
    assert_eq!(p1_version, 0);
    let (p2, _) = placement_state(&harness, "/resources/group-placements/p2").await;
    assert_eq!(p2.available_instances, 2);
    assert_eq!(p2.allocated_instances, 3);
}

#[tokio::test]
async fn test_lowest_priority_number_wins() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/low", "/resources/pools/rp1", 5, 10, &[]),
    )
    .await;
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/high", "/resources/pools/rp2", 1, 10, &[]),
    )
    .await;
    seed_compute(&harness, "/resources/hosts/h1", "/resources/pools/rp1").await;
    seed_compute(&harness, "/resources/hosts/h2", "/resources/pools/rp2").await;

    let record = harness
        .reservations
        .create(CreateRequest::new(reservation_request(1)))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    assert_eq!(
        finished
            .payload
            .group_placement_link
            .expect("placement selected")
            .as_str(),
        "/resources/group-placements/high"
    );
    let (low, low_version) = placement_state(&harness, "/resources/group-placements/low").await;
    assert_eq!(low.allocated_instances, 0);
    assert_eq!(low_version, 0);
}

#[tokio::test]
async fn test_tenant_scope_exhaustion_escalates_to_global() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    // no tenant-scoped placements exist; one global placement does
    seed_placement(
        &harness,
        &group_placement(
            "/resources/group-placements/global",
            "/resources/pools/rp1",
            1,
            5,
            &[],
        ),
    )
    .await;
    seed_compute(&harness, "/resources/hosts/h1", "/resources/pools/rp1").await;

    let record = harness
        .reservations
        .create(
            CreateRequest::new(reservation_request(2))
                .with_tenant_links(vec!["/tenants/t1".into()]),
        )
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    // escalation cleared the scope on the allocator's own record
    assert!(finished.tenant_links.is_empty());
    assert_eq!(
        finished
            .payload
            .group_placement_link
            .expect("placement selected")
            .as_str(),
        "/resources/group-placements/global"
    );
    let (global, _) = placement_state(&harness, "/resources/group-placements/global").await;
    assert_eq!(global.allocated_instances, 2);
}

#[tokio::test]
async fn test_pool_without_contributing_hosts_is_never_attempted() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    // priority-ranked highest but its pool has zero powered-on hosts
    seed_placement(
        &harness,
        &group_placement(
            "/resources/group-placements/empty-pool",
            "/resources/pools/rp-empty",
            1,
            10,
            &[],
        ),
    )
    .await;
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/backed", "/resources/pools/rp2", 2, 10, &[]),
    )
    .await;
    seed_compute(&harness, "/resources/hosts/h2", "/resources/pools/rp2").await;

    let record = harness
        .reservations
        .create(CreateRequest::new(reservation_request(1)))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    assert_eq!(
        finished
            .payload
            .group_placement_link
            .expect("placement selected")
            .as_str(),
        "/resources/group-placements/backed"
    );
    let (empty, empty_version) =
        placement_state(&harness, "/resources/group-placements/empty-pool").await;
    assert_eq!(empty.allocated_instances, 0);
    assert_eq!(empty_version, 0);
}

/// Seed a reservation record parked at RESERVATION_SELECTED and resume
/// it, driving the reservation attempt directly.
async fn seed_reservation_at_selection(
    harness: &Harness,
    link: &str,
    selected: &str,
    remaining: Vec<PlacementCandidate>,
    count: u64,
) -> TaskLink {
    let self_link = TaskLink::new(link);
    let mut payload = reservation_request(count);
    payload.group_placement_link = Some(PlacementLink::new(selected));
    payload.placement_candidates = Some(remaining);
    let mut record: TaskRecord<ReservationSubStage, ReservationTaskState> = TaskRecord::new(
        self_link.clone(),
        payload,
        chrono::Utc::now() + chrono::Duration::hours(1),
    );
    record.stage = TaskStage::Started;
    record.sub_stage = ReservationSubStage::ReservationSelected;
    seed(&harness.store, ReservationTask::KIND, link, &record).await;
    self_link
}

#[tokio::test]
async fn test_reservation_conflict_advances_to_next_candidate() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    // the selected placement lost its capacity after selection
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/p1", "/resources/pools/rp1", 1, 2, &[]),
    )
    .await;
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/p2", "/resources/pools/rp2", 2, 5, &[]),
    )
    .await;

    let next = PlacementCandidate {
        placement_link: PlacementLink::new("/resources/group-placements/p2"),
        resource_pool_link: PoolLink::new("/resources/pools/rp2"),
        priority: 2,
    };
    let link = seed_reservation_at_selection(
        &harness,
        "/requests/reservation-tasks/conflicted",
        "/resources/group-placements/p1",
        vec![next],
        3,
    )
    .await;
    harness.reservations.resume(&link).await.expect("resume");

    let finished = wait_for_terminal(&harness, &link).await;
    assert_eq!(finished.stage, TaskStage::Finished);
    assert_eq!(
        finished
            .payload
            .group_placement_link
            .expect("placement selected")
            .as_str(),
        "/resources/group-placements/p2"
    );
    let (p1, p1_version) = placement_state(&harness, "/resources/group-placements/p1").await;
    assert_eq!(p1.available_instances, 2);
    assert_eq!(p1_version, 0);
}

#[tokio::test]
async fn test_candidate_exhaustion_fails_with_no_available_placements() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    seed_placement(
        &harness,
        &group_placement("/resources/group-placements/p1", "/resources/pools/rp1", 1, 2, &[]),
    )
    .await;

    let link = seed_reservation_at_selection(
        &harness,
        "/requests/reservation-tasks/exhausted",
        "/resources/group-placements/p1",
        Vec::new(),
        3,
    )
    .await;
    harness.reservations.resume(&link).await.expect("resume");

    let failed = wait_for_terminal(&harness, &link).await;
    assert_eq!(failed.stage, TaskStage::Failed);
    assert_eq!(failed.sub_stage, ReservationSubStage::Error);
    assert_eq!(
        failed.failure.expect("failure persisted").message,
        "No available group placements."
    );
}

#[tokio::test]
async fn test_completion_merges_placement_custom_properties() {
    let harness = setup();
    seed(
        &harness.store,
        ResourceDescription::KIND,
        "/resources/descriptions/app",
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    let mut placement =
        group_placement("/resources/group-placements/p1", "/resources/pools/rp1", 1, 5, &[]);
    placement
        .custom_properties
        .insert("region".into(), "eu-west".into());
    seed_placement(&harness, &placement).await;
    seed_compute(&harness, "/resources/hosts/h1", "/resources/pools/rp1").await;

    let record = harness
        .reservations
        .create(CreateRequest::new(reservation_request(1)))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    assert_eq!(
        finished.custom_properties.get("region"),
        Some(&"eu-west".to_string())
    );
}
