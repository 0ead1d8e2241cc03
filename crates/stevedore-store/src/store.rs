//! The document store trait.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::Document;
use crate::error::StoreError;
use crate::query::{DocumentQuery, QueryEvent};

/// Narrow interface of the durable, versioned record store.
///
/// Single-document updates are conditional on the caller's expected
/// version; that compare-and-swap is the only synchronization primitive
/// the engine and scheduler rely on.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Persist a new document at the given link with version 0.
    async fn create(&self, kind: &str, self_link: &str, body: Value)
        -> Result<Document, StoreError>;

    /// Point read of a document.
    async fn get(&self, self_link: &str) -> Result<Document, StoreError>;

    /// Replace a document body if `expected_version` still matches the
    /// stored version; the accepted update increments the version.
    async fn update(
        &self,
        self_link: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<Document, StoreError>;

    /// Remove a document. Removing a missing document is not an error.
    async fn delete(&self, self_link: &str) -> Result<(), StoreError>;

    /// Run a field-predicate query. Matching documents (or links, when
    /// the query does not expand content) arrive on the returned
    /// channel; the channel closing is the "no more results" sentinel.
    async fn query(&self, query: DocumentQuery) -> mpsc::Receiver<QueryEvent>;
}

/// Drain a query channel into a vector of documents, propagating a
/// failure event as an error. Emptiness is decided only after the
/// sentinel, never up front.
pub async fn collect_documents(
    mut rx: mpsc::Receiver<QueryEvent>,
) -> Result<Vec<Document>, StoreError> {
    let mut documents = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            QueryEvent::Document(doc) => documents.push(doc),
            QueryEvent::Link(link) => {
                return Err(StoreError::Serialization(format!(
                    "expected expanded document, got link {}",
                    link
                )))
            }
            QueryEvent::Failure(err) => return Err(err),
        }
    }
    Ok(documents)
}

/// Drain a query channel into a vector of links, propagating a failure
/// event as an error.
pub async fn collect_links(mut rx: mpsc::Receiver<QueryEvent>) -> Result<Vec<String>, StoreError> {
    let mut links = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            QueryEvent::Document(doc) => links.push(doc.self_link),
            QueryEvent::Link(link) => links.push(link),
            QueryEvent::Failure(err) => return Err(err),
        }
    }
    Ok(links)
}
