//! Stevedore Document Store
//!
//! The narrow interface the task engine consumes from its durable,
//! versioned record store: create with an initial version, point read,
//! conditional update by version, delete, and a field-predicate query
//! whose results arrive as a channel sequence - the channel closing is
//! the "no more results" sentinel, so emptiness is only ever detected
//! after iteration completes.
//!
//! [`MemoryDocumentStore`] is the in-process implementation used by
//! tests and embedded deployments. Replicated backends implement the
//! same [`DocumentStore`] trait.

pub mod document;
pub mod error;
pub mod memory;
pub mod query;
pub mod store;

// Re-export commonly used types
pub use document::Document;
pub use error::StoreError;
pub use memory::MemoryDocumentStore;
pub use query::{Clause, DocumentQuery, QueryEvent};
pub use store::{collect_documents, collect_links, DocumentStore};
