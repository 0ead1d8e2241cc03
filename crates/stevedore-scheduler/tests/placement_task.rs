//! Placement task integration tests over the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stevedore_core::{
    HostDescription, HostLink, HostState, PoolLink, PowerState, ResourceDescription,
    ResourceState, TaskLink, TaskRecord, TaskStage,
};
use stevedore_engine::{CreateRequest, EngineConfig, TaskEngine, TaskRegistry};
use stevedore_scheduler::{
    PlacementContext, PlacementSubStage, PlacementTask, PlacementTaskState, SchedulerConfig,
};
use stevedore_store::{DocumentStore, MemoryDocumentStore};

struct Harness {
    store: Arc<dyn DocumentStore>,
    placements: Arc<TaskEngine<PlacementTask>>,
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
    Harness { store, placements }
}

async fn seed<T: serde::Serialize>(store: &Arc<dyn DocumentStore>, kind: &str, link: &str, body: &T) {
    store
        .create(kind, link, serde_json::to_value(body).expect("serialize"))
        .await
        .expect("seed document");
}

async fn seed_description(harness: &Harness, description: &ResourceDescription) {
    seed(
        &harness.store,
        ResourceDescription::KIND,
        &description.self_link,
        description,
    )
    .await;
}

async fn seed_host_description(harness: &Harness, link: &str, kinds: &[&str]) {
    let description = HostDescription {
        self_link: link.to_owned(),
        supported_resource_kinds: kinds.iter().map(|k| k.to_string()).collect(),
        zone_id: None,
    };
    seed(&harness.store, HostDescription::KIND, link, &description).await;
}

async fn seed_host(
    harness: &Harness,
    link: &str,
    description_link: &str,
    pools: &[&str],
    power_state: PowerState,
    available_memory: u64,
) {
    let host = HostState {
        self_link: HostLink::new(link),
        description_link: description_link.to_owned(),
        resource_pool_links: pools.iter().map(|p| PoolLink::new(*p)).collect(),
        power_state,
        available_memory,
        deployment_policy_link: None,
        cluster_store: None,
        plugins: None,
        custom_properties: HashMap::new(),
    };
    seed(&harness.store, HostState::KIND, link, &host).await;
}

fn placement_request(count: u64, pools: &[&str]) -> PlacementTaskState {
    PlacementTaskState {
        resource_description_link: "/resources/descriptions/app".into(),
        resource_type: "container".into(),
        resource_count: count,
        resource_pool_links: pools.iter().map(|p| PoolLink::new(*p)).collect(),
        context_id: "ctx-1".into(),
        candidate_hosts: None,
        host_selections: None,
    }
}

async fn wait_for_terminal(
    harness: &Harness,
    link: &TaskLink,
) -> TaskRecord<PlacementSubStage, PlacementTaskState> {
    for _ in 0..500 {
        let document = harness.store.get(link.as_str()).await.expect("record");
        let record: TaskRecord<PlacementSubStage, PlacementTaskState> =
            document.parse().expect("record parses");
        if record.stage.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("placement task never settled");
}

#[tokio::test]
async fn test_undersized_host_set_is_cycled_fairly() {
    let harness = setup();
    seed_description(
        &harness,
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["container"]).await;
    seed_host(
        &harness,
        "/resources/hosts/h1",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::On,
        0,
    )
    .await;
    seed_host(
        &harness,
        "/resources/hosts/h2",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::On,
        0,
    )
    .await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            5,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    let selections = finished.payload.host_selections.expect("selections set");
    assert_eq!(selections.len(), 5);

    // round-robin spread: each host appears floor(5/2) or ceil(5/2)
    // times, and the list cycles the leading permutation
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for selection in &selections {
        *occurrences.entry(selection.host_link.as_str()).or_default() += 1;
    }
    assert_eq!(occurrences.len(), 2);
    for (_, count) in occurrences {
        assert!(count == 2 || count == 3);
    }
    for (i, selection) in selections.iter().enumerate() {
        assert_eq!(selection.host_link, selections[i % 2].host_link);
    }
}

#[tokio::test]
async fn test_only_powered_on_hosts_in_scope_are_candidates() {
    let harness = setup();
    seed_description(
        &harness,
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["container"]).await;
    seed_host(
        &harness,
        "/resources/hosts/on-in-scope",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::On,
        0,
    )
    .await;
    seed_host(
        &harness,
        "/resources/hosts/powered-off",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::Off,
        0,
    )
    .await;
    seed_host(
        &harness,
        "/resources/hosts/other-pool",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp9"],
        PowerState::On,
        0,
    )
    .await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            2,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    let selections = finished.payload.host_selections.expect("selections set");
    assert_eq!(selections.len(), 2);
    for selection in &selections {
        assert_eq!(selection.host_link.as_str(), "/resources/hosts/on-in-scope");
    }
}

#[tokio::test]
async fn test_memory_filter_empties_set_into_hard_failure() {
    let harness = setup();
    let mut description = ResourceDescription::new("/resources/descriptions/app", "app");
    description.memory_limit = 4096;
    seed_description(&harness, &description).await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["container"]).await;
    seed_host(
        &harness,
        "/resources/hosts/small",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::On,
        1024,
    )
    .await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            1,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let failed = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(failed.stage, TaskStage::Failed);
    assert_eq!(failed.sub_stage, PlacementSubStage::Error);
    let failure = failed.failure.expect("failure persisted");
    assert!(failure.message.contains("no suitable host"));
}

#[tokio::test]
async fn test_missing_compatible_description_fails() {
    let harness = setup();
    seed_description(
        &harness,
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["volume"]).await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            1,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let failed = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(failed.stage, TaskStage::Failed);
    let failure = failed.failure.expect("failure persisted");
    assert!(failure
        .message
        .contains("Available host description not found supporting the type: container"));
}

#[tokio::test]
async fn test_zero_powered_on_hosts_fails_after_retry_budget() {
    let harness = setup();
    seed_description(
        &harness,
        &ResourceDescription::new("/resources/descriptions/app", "app"),
    )
    .await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["container"]).await;
    seed_host(
        &harness,
        "/resources/hosts/asleep",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::Off,
        0,
    )
    .await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            1,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let failed = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(failed.stage, TaskStage::Failed);
    let failure = failed.failure.expect("failure persisted");
    assert!(failure.message.contains("Container host not found"));
}

#[tokio::test]
async fn test_affinity_constraint_narrows_to_peer_host() {
    let harness = setup();
    let mut description = ResourceDescription::new("/resources/descriptions/app", "app");
    description.affinity = vec!["redis".into()];
    seed_description(&harness, &description).await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["container"]).await;
    for link in ["/resources/hosts/h1", "/resources/hosts/h2"] {
        seed_host(
            &harness,
            link,
            "/resources/host-descriptions/docker",
            &["/resources/pools/rp1"],
            PowerState::On,
            0,
        )
        .await;
    }
    let peer = ResourceState {
        self_link: "/resources/resource-states/redis-1".into(),
        name: "redis".into(),
        description_link: "/resources/descriptions/redis".into(),
        host_link: "/resources/hosts/h2".into(),
        context_id: "ctx-1".into(),
    };
    seed(&harness.store, ResourceState::KIND, &peer.self_link, &peer).await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            2,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let finished = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(finished.stage, TaskStage::Finished);
    let selections = finished.payload.host_selections.expect("selections set");
    for selection in &selections {
        assert_eq!(selection.host_link.as_str(), "/resources/hosts/h2");
    }
}

#[tokio::test]
async fn test_hard_anti_affinity_surfaces_constraint_message_verbatim() {
    let harness = setup();
    let mut description = ResourceDescription::new("/resources/descriptions/app", "app");
    description.affinity = vec!["!redis".into()];
    seed_description(&harness, &description).await;
    seed_host_description(&harness, "/resources/host-descriptions/docker", &["container"]).await;
    seed_host(
        &harness,
        "/resources/hosts/h1",
        "/resources/host-descriptions/docker",
        &["/resources/pools/rp1"],
        PowerState::On,
        0,
    )
    .await;
    let peer = ResourceState {
        self_link: "/resources/resource-states/redis-1".into(),
        name: "redis".into(),
        description_link: "/resources/descriptions/redis".into(),
        host_link: "/resources/hosts/h1".into(),
        context_id: "ctx-1".into(),
    };
    seed(&harness.store, ResourceState::KIND, &peer.self_link, &peer).await;

    let record = harness
        .placements
        .create(CreateRequest::new(placement_request(
            1,
            &["/resources/pools/rp1"],
        )))
        .await
        .expect("create");
    let failed = wait_for_terminal(&harness, &record.self_link).await;

    assert_eq!(failed.stage, TaskStage::Failed);
    assert_eq!(
        failed.failure.expect("failure persisted").message,
        "no host available after anti-affinity constraint [redis]"
    );
}
