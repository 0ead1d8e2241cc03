//! The requested-resource description document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Describes the resource a request wants instances of. The scheduler
/// reads it for sizing, affinity and deployment-policy constraints; the
/// CRUD task bodies that consume it further are out of scope here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescription {
    /// Self link of this description document.
    pub self_link: String,

    /// Resource name, referenced by affinity constraints of peers.
    pub name: String,

    /// Memory limit in bytes per instance. 0 means unlimited.
    #[serde(default)]
    pub memory_limit: u64,

    /// Affinity constraint strings: `name` for affinity, `!name` for
    /// anti-affinity, with an optional `:soft` suffix.
    #[serde(default)]
    pub affinity: Vec<String>,

    /// Deployment policy this description should be provisioned under.
    pub deployment_policy_id: Option<String>,

    /// Optional zone the resource must be placed in.
    pub zone_id: Option<String>,

    /// Requested cluster size, when the description is clustered.
    #[serde(default)]
    pub cluster_size: u32,

    /// Custom properties.
    #[serde(default)]
    pub custom_properties: HashMap<String, String>,
}

impl ResourceDescription {
    /// Document kind of resource descriptions.
    pub const KIND: &'static str = "resource-description";

    /// Create a description with a name and self link.
    pub fn new(self_link: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            self_link: self_link.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A deployed resource instance. Only the fields the affinity filters
/// read are modeled; the CRUD task bodies owning these documents are
/// out of scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Self link of this resource document.
    pub self_link: String,

    /// Resource name, matched against affinity constraints.
    pub name: String,

    /// Link to the description the resource was created from.
    pub description_link: String,

    /// Host the resource landed on.
    pub host_link: String,

    /// Request context the resource was provisioned under.
    pub context_id: String,
}

impl ResourceState {
    /// Document kind of resource instances.
    pub const KIND: &'static str = "resource-state";
}
