//! Store errors.

use thiserror::Error;

/// Errors surfaced by a [`crate::DocumentStore`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No document exists at the given link.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A document already exists at the given link.
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// The expected version did not match the current one. The caller
    /// re-reads and retries, or treats the update as superseded.
    #[error("version conflict on {link}: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Link of the contested document.
        link: String,
        /// Version the caller expected.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// The document body could not be serialized or deserialized.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True for the optimistic-concurrency collision case.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
