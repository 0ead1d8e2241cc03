//! Endpoint registry for cross-task transition routing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::EngineError;
use crate::transition::TaskTransition;

/// Anything that accepts transition requests for the task links under
/// its factory prefix: task engines and the counter subtask service.
#[async_trait]
pub trait TaskEndpoint: Send + Sync {
    /// Apply a transition request to the record at `link`.
    async fn patch(&self, link: &str, transition: TaskTransition) -> Result<(), EngineError>;
}

/// Maps factory link prefixes to their endpoints. Callbacks resolve the
/// target task's owner here - the in-process rendering of factory-link
/// dispatch.
#[derive(Default)]
pub struct TaskRegistry {
    endpoints: RwLock<HashMap<String, Arc<dyn TaskEndpoint>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an endpoint under a factory link prefix.
    pub fn register(&self, factory_link: &str, endpoint: Arc<dyn TaskEndpoint>) {
        if let Ok(mut endpoints) = self.endpoints.write() {
            endpoints.insert(factory_link.to_owned(), endpoint);
        }
    }

    /// Resolve the endpoint owning `link` by longest matching prefix.
    pub fn resolve(&self, link: &str) -> Option<Arc<dyn TaskEndpoint>> {
        let endpoints = self.endpoints.read().ok()?;
        endpoints
            .iter()
            .filter(|(prefix, _)| link.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, endpoint)| endpoint.clone())
    }
}
