//! Compute host documents and the ephemeral host selection built from
//! them during a placement run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{HostLink, PoolLink};

/// Power state of a compute host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

/// Describes a family of compute hosts: which resource kinds they can
/// run and, optionally, which zone they live in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostDescription {
    /// Self link of this description document.
    pub self_link: String,

    /// Resource kinds instances of this description can host.
    #[serde(default)]
    pub supported_resource_kinds: Vec<String>,

    /// Optional availability zone.
    pub zone_id: Option<String>,
}

impl HostDescription {
    /// Document kind of host descriptions.
    pub const KIND: &'static str = "host-description";
}

/// A concrete compute host document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    /// Self link of this host document.
    pub self_link: HostLink,

    /// Link to the host's [`HostDescription`].
    pub description_link: String,

    /// Resource pools the host is a member of.
    #[serde(default)]
    pub resource_pool_links: Vec<PoolLink>,

    /// Current power state. Only powered-on hosts are placement
    /// candidates.
    pub power_state: PowerState,

    /// Available memory in bytes. 0 means unlimited/unreported.
    #[serde(default)]
    pub available_memory: u64,

    /// Deployment policy advertised by the host, if any.
    pub deployment_policy_link: Option<String>,

    /// Cluster store metadata used by network affinity filters.
    pub cluster_store: Option<String>,

    /// Comma-separated plugin metadata used by volume filters.
    pub plugins: Option<String>,

    /// Custom properties.
    #[serde(default)]
    pub custom_properties: HashMap<String, String>,
}

impl HostState {
    /// Document kind of host states.
    pub const KIND: &'static str = "host-state";
}

/// A candidate host narrowed by the filter pipeline.
///
/// Built fresh per placement run from the queried host and description
/// documents; never persisted beyond the owning placement task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSelection {
    /// Link of the candidate host.
    pub host_link: HostLink,

    /// Resource pools the host belongs to.
    #[serde(default)]
    pub resource_pool_links: Vec<PoolLink>,

    /// Resource kinds the host's description supports.
    #[serde(default)]
    pub supported_resource_kinds: Vec<String>,

    /// Available memory in bytes. 0 means unlimited.
    #[serde(default)]
    pub available_memory: u64,

    /// Deployment policy advertised by the host, if any.
    pub deployment_policy_link: Option<String>,

    /// Cluster store metadata.
    pub cluster_store: Option<String>,

    /// Plugin metadata.
    pub plugins: Option<String>,
}

impl HostSelection {
    /// Build a selection from a host document and its description.
    pub fn from_host(host: &HostState, description: &HostDescription) -> Self {
        Self {
            host_link: host.self_link.clone(),
            resource_pool_links: host.resource_pool_links.clone(),
            supported_resource_kinds: description.supported_resource_kinds.clone(),
            available_memory: host.available_memory,
            deployment_policy_link: host.deployment_policy_link.clone(),
            cluster_store: host.cluster_store.clone(),
            plugins: host.plugins.clone(),
        }
    }
}
