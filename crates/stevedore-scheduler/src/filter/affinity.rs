//! Affinity and anti-affinity host filtering.
//!
//! Constraints are declared on the resource description as strings:
//! `name` places instances with resources named `name`, `!name` away
//! from them, and a `:soft` suffix downgrades the constraint to a
//! preference that falls back to the unfiltered set.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use stevedore_core::{HostSelection, ResourceDescription, ResourceState};
use stevedore_store::{collect_documents, Clause, DocumentQuery, DocumentStore};

use super::{FilterError, HostSelectionFilter};

/// One parsed affinity constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityConstraint {
    /// Name of the peer resource the constraint refers to.
    pub name: String,
    /// True for anti-affinity (`!name`).
    pub anti_affinity: bool,
    /// Soft constraints fall back to the unfiltered set instead of
    /// failing the run.
    pub soft: bool,
}

impl AffinityConstraint {
    /// Parse a constraint string: `[!]name[:soft|:hard]`.
    pub fn parse(raw: &str) -> Self {
        let (anti_affinity, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (name, soft) = match rest.rsplit_once(':') {
            Some((name, "soft")) => (name, true),
            Some((name, "hard")) => (name, false),
            _ => (rest, false),
        };
        Self {
            name: name.to_owned(),
            anti_affinity,
            soft,
        }
    }
}

/// Filters candidates by the hosts of named peer resources within the
/// same request context.
pub struct AffinityHostFilter {
    store: Arc<dyn DocumentStore>,
    constraints: Vec<AffinityConstraint>,
    context_id: String,
}

impl AffinityHostFilter {
    /// Build the filter from a description's declared constraints.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        description: &ResourceDescription,
        context_id: &str,
    ) -> Self {
        let constraints = description
            .affinity
            .iter()
            .map(|raw| AffinityConstraint::parse(raw))
            .collect();
        Self {
            store,
            constraints,
            context_id: context_id.to_owned(),
        }
    }

    /// Hosts of peer resources carrying the given name.
    fn peer_hosts<'a>(&self, peers: &'a [ResourceState], name: &str) -> HashSet<&'a str> {
        peers
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.host_link.as_str())
            .collect()
    }
}

#[async_trait]
impl HostSelectionFilter for AffinityHostFilter {
    fn is_active(&self) -> bool {
        !self.constraints.is_empty()
    }

    async fn filter(
        &self,
        candidates: Vec<HostSelection>,
    ) -> Result<Vec<HostSelection>, FilterError> {
        let names: Vec<serde_json::Value> = self
            .constraints
            .iter()
            .map(|c| json!(c.name.clone()))
            .collect();
        info!(
            context = %self.context_id,
            constraints = names.len(),
            "Affinity filter active for placement host selection"
        );

        let query = DocumentQuery::for_kind(ResourceState::KIND)
            .with_clause(Clause::In {
                field: "name".into(),
                values: names,
            })
            .with_clause(Clause::Term {
                field: "context_id".into(),
                value: json!(self.context_id),
            })
            .expand();
        let peers: Vec<ResourceState> = collect_documents(self.store.query(query).await)
            .await?
            .iter()
            .map(|doc| doc.parse())
            .collect::<Result<_, _>>()?;

        let mut current = candidates;
        for constraint in &self.constraints {
            let hosts = self.peer_hosts(&peers, &constraint.name);

            if constraint.anti_affinity {
                // nothing deployed under that name, nothing to avoid
                if hosts.is_empty() {
                    continue;
                }
                let narrowed: Vec<HostSelection> = current
                    .iter()
                    .filter(|c| !hosts.contains(c.host_link.as_str()))
                    .cloned()
                    .collect();
                if narrowed.is_empty() {
                    if constraint.soft {
                        continue;
                    }
                    return Err(FilterError::Selection(format!(
                        "no host available after anti-affinity constraint [{}]",
                        constraint.name
                    )));
                }
                current = narrowed;
            } else {
                if hosts.is_empty() {
                    if constraint.soft {
                        continue;
                    }
                    return Err(FilterError::Selection(format!(
                        "no resources found for affinity constraint [{}]",
                        constraint.name
                    )));
                }
                let narrowed: Vec<HostSelection> = current
                    .iter()
                    .filter(|c| hosts.contains(c.host_link.as_str()))
                    .cloned()
                    .collect();
                if narrowed.is_empty() {
                    if constraint.soft {
                        continue;
                    }
                    return Err(FilterError::Selection(format!(
                        "no host satisfies affinity constraint [{}]",
                        constraint.name
                    )));
                }
                current = narrowed;
            }
        }
        Ok(current)
    }
}
