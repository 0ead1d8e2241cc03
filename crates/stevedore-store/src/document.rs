//! Stored document representation.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// A versioned document as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique self link, e.g. `/requests/placement-tasks/<uuid>`.
    pub self_link: String,

    /// Document kind, the queryable family the document belongs to.
    pub kind: String,

    /// Monotonic version, incremented on every accepted update.
    pub version: u64,

    /// The document body.
    pub body: Value,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Deserialize the body into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| StoreError::Serialization(format!("{}: {}", self.self_link, e)))
    }
}
