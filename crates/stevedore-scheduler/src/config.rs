//! Scheduler configuration.

use std::time::Duration;

/// Placement and reservation scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Retries for empty host/placement query results.
    pub query_retry_count: u32,

    /// Fixed backoff between query retries. No exponential backoff,
    /// no jitter.
    pub query_retry_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            query_retry_count: 2,
            query_retry_interval: Duration::from_millis(500),
        }
    }
}
