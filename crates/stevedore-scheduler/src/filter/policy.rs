//! Deployment policy preference filtering.

use async_trait::async_trait;

use stevedore_core::HostSelection;

use super::{FilterError, HostSelectionFilter};

/// Prefers hosts advertising the description's deployment policy,
/// falling back to the unfiltered set when none do.
pub struct DeploymentPolicyFilter {
    policy_id: Option<String>,
}

impl DeploymentPolicyFilter {
    /// Create a filter for an optional deployment policy id.
    pub fn new(policy_id: Option<String>) -> Self {
        Self { policy_id }
    }
}

#[async_trait]
impl HostSelectionFilter for DeploymentPolicyFilter {
    fn is_active(&self) -> bool {
        self.policy_id.is_some()
    }

    async fn filter(
        &self,
        candidates: Vec<HostSelection>,
    ) -> Result<Vec<HostSelection>, FilterError> {
        let Some(policy_id) = &self.policy_id else {
            return Ok(candidates);
        };
        let preferred: Vec<HostSelection> = candidates
            .iter()
            .filter(|c| {
                c.deployment_policy_link
                    .as_deref()
                    .map(|link| link.ends_with(policy_id.as_str()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if preferred.is_empty() {
            // preference, not a requirement
            Ok(candidates)
        } else {
            Ok(preferred)
        }
    }
}
