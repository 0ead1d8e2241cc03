//! Engine configuration.

use std::time::Duration;

/// Task engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default time-to-live stamped on new task records. Expiry
    /// enforcement is external to the engine.
    pub task_ttl: Duration,

    /// Retries for the terminal request-tracker update.
    pub tracker_retry_count: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_ttl: Duration::from_secs(60 * 60),
            tracker_retry_count: 3,
        }
    }
}
