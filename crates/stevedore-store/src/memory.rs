//! In-process document store used by tests and embedded deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::document::Document;
use crate::error::StoreError;
use crate::query::{DocumentQuery, QueryEvent};
use crate::store::DocumentStore;

/// Versioned in-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// True when the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(
        &self,
        kind: &str,
        self_link: &str,
        body: Value,
    ) -> Result<Document, StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(self_link) {
            return Err(StoreError::AlreadyExists(self_link.to_owned()));
        }
        let document = Document {
            self_link: self_link.to_owned(),
            kind: kind.to_owned(),
            version: 0,
            body,
            updated_at: Utc::now(),
        };
        documents.insert(self_link.to_owned(), document.clone());
        debug!(link = %self_link, kind = %kind, "Document created");
        Ok(document)
    }

    async fn get(&self, self_link: &str) -> Result<Document, StoreError> {
        self.documents
            .read()
            .await
            .get(self_link)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(self_link.to_owned()))
    }

    async fn update(
        &self,
        self_link: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<Document, StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(self_link)
            .ok_or_else(|| StoreError::NotFound(self_link.to_owned()))?;
        if document.version != expected_version {
            return Err(StoreError::VersionConflict {
                link: self_link.to_owned(),
                expected: expected_version,
                actual: document.version,
            });
        }
        document.version += 1;
        document.body = body;
        document.updated_at = Utc::now();
        Ok(document.clone())
    }

    async fn delete(&self, self_link: &str) -> Result<(), StoreError> {
        self.documents.write().await.remove(self_link);
        Ok(())
    }

    async fn query(&self, query: DocumentQuery) -> mpsc::Receiver<QueryEvent> {
        let matches: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .filter(|d| d.kind == query.kind && query.matches(&d.body))
            .cloned()
            .collect();

        let (tx, rx) = mpsc::channel(matches.len().max(1));
        for document in matches {
            let event = if query.expand_content {
                QueryEvent::Document(document)
            } else {
                QueryEvent::Link(document.self_link)
            };
            // capacity covers every match, so try_send cannot fail
            let _ = tx.try_send(event);
        }
        // dropping the sender closes the channel - the sentinel
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Clause;
    use crate::store::{collect_documents, collect_links};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryDocumentStore::new();
        let doc = store
            .create("host-states", "/hosts/h1", json!({"power_state": "ON"}))
            .await
            .expect("create");
        assert_eq!(doc.version, 0);

        let read = store.get("/hosts/h1").await.expect("get");
        assert_eq!(read.body["power_state"], "ON");
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let store = MemoryDocumentStore::new();
        store
            .create("host-states", "/hosts/h1", json!({}))
            .await
            .expect("create");
        let err = store
            .create("host-states", "/hosts/h1", json!({}))
            .await
            .expect_err("duplicate create");
        assert_eq!(err, StoreError::AlreadyExists("/hosts/h1".into()));
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let store = MemoryDocumentStore::new();
        store
            .create("host-states", "/hosts/h1", json!({"n": 0}))
            .await
            .expect("create");

        let updated = store
            .update("/hosts/h1", 0, json!({"n": 1}))
            .await
            .expect("first update");
        assert_eq!(updated.version, 1);

        let err = store
            .update("/hosts/h1", 0, json!({"n": 2}))
            .await
            .expect_err("stale update");
        assert!(err.is_conflict());
        // losing writer sees the current version to re-read against
        assert_eq!(
            err,
            StoreError::VersionConflict {
                link: "/hosts/h1".into(),
                expected: 0,
                actual: 1
            }
        );
    }

    #[tokio::test]
    async fn test_query_delivers_then_closes() {
        let store = MemoryDocumentStore::new();
        store
            .create("host-states", "/hosts/h1", json!({"power_state": "ON"}))
            .await
            .expect("create");
        store
            .create("host-states", "/hosts/h2", json!({"power_state": "OFF"}))
            .await
            .expect("create");

        let query = DocumentQuery::for_kind("host-states")
            .with_clause(Clause::Term {
                field: "power_state".into(),
                value: json!("ON"),
            })
            .expand();
        let docs = collect_documents(store.query(query).await)
            .await
            .expect("query");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].self_link, "/hosts/h1");
    }

    #[tokio::test]
    async fn test_query_without_expand_yields_links() {
        let store = MemoryDocumentStore::new();
        store
            .create("host-descriptions", "/descriptions/d1", json!({}))
            .await
            .expect("create");

        let links = collect_links(store.query(DocumentQuery::for_kind("host-descriptions")).await)
            .await
            .expect("query");
        assert_eq!(links, vec!["/descriptions/d1".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_query_closes_immediately() {
        let store = MemoryDocumentStore::new();
        let links = collect_links(store.query(DocumentQuery::for_kind("host-states")).await)
            .await
            .expect("query");
        assert!(links.is_empty());
    }
}
