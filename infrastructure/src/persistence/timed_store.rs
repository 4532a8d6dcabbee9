use application::{ApplicationError, DocumentStore, SortBy};
use async_trait::async_trait;
use domain::{Document, DocumentId, Fields};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bounds every call to the wrapped store by a fixed timeout.
#[derive(Clone)]
pub struct TimedDocumentStore {
    inner: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl TimedDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ApplicationError>
    where
        F: Future<Output = Result<T, ApplicationError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Document store call timed out");
                Err(ApplicationError::StoreTimeout {
                    operation,
                    timeout_ms: self.timeout.as_millis(),
                })
            }
        }
    }
}

#[async_trait]
impl DocumentStore for TimedDocumentStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, ApplicationError> {
        self.bounded("get_all", self.inner.get_all(collection)).await
    }

    async fn get(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, ApplicationError> {
        self.bounded("get", self.inner.get(collection, id)).await
    }

    async fn add(&self, collection: &str, fields: &Fields) -> Result<DocumentId, ApplicationError> {
        self.bounded("add", self.inner.add(collection, fields)).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        updates: &Fields,
    ) -> Result<bool, ApplicationError> {
        self.bounded("update", self.inner.update(collection, id, updates))
            .await
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, ApplicationError> {
        self.bounded("delete", self.inner.delete(collection, id)).await
    }

    async fn count(&self, collection: &str) -> Result<u64, ApplicationError> {
        self.bounded("count", self.inner.count(collection)).await
    }

    async fn list_ordered(
        &self,
        collection: &str,
        sort: &SortBy,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApplicationError> {
        self.bounded(
            "list_ordered",
            self.inner.list_ordered(collection, sort, limit, offset),
        )
        .await
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, ApplicationError> {
        self.bounded(
            "find_by_field",
            self.inner.find_by_field(collection, field, value),
        )
        .await
    }
}
