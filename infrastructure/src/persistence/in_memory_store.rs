// ./infrastructure/src/persistence/in_memory_store.rs
use application::{ApplicationError, DocumentStore, SortBy};
use async_trait::async_trait;
use dashmap::DashMap;
use domain::{Document, DocumentId, Fields};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::search::linear_scan::sort_documents;

/// Document store kept in process memory. Used for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    // Collection Name -> (Document ID -> Document)
    store: Arc<DashMap<String, DashMap<DocumentId, Arc<Document>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Snapshot of a collection, ordered by id.
    fn snapshot(&self, collection_name: &str) -> Vec<Document> {
        let mut documents: Vec<Document> = match self.store.get(collection_name) {
            Some(collection_store) => collection_store
                .iter()
                .map(|entry| (**entry.value()).clone())
                .collect(),
            None => Vec::new(),
        };
        documents.sort_by(|a, b| a.id().cmp(b.id()));
        documents
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    #[instrument(skip(self))]
    async fn get_all(&self, collection_name: &str) -> Result<Vec<Document>, ApplicationError> {
        let documents = self.snapshot(collection_name);
        debug!(collection = %collection_name, count = documents.len(), "Read whole collection from in-memory store");
        Ok(documents)
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, ApplicationError> {
        debug!(collection = %collection_name, doc_id = %id, "Getting document from in-memory store");
        let document = self
            .store
            .get(collection_name)
            .and_then(|collection_store| {
                collection_store.get(id).map(|doc_ref| (**doc_ref).clone())
            });
        Ok(document)
    }

    #[instrument(skip(self, fields))]
    async fn add(
        &self,
        collection_name: &str,
        fields: &Fields,
    ) -> Result<DocumentId, ApplicationError> {
        // Random ids are never reused
        let id = DocumentId::new(Uuid::new_v4().simple().to_string());
        debug!(collection = %collection_name, doc_id = %id, "Adding document to in-memory store");
        let collection_store = self
            .store
            .entry(collection_name.to_string())
            .or_default(); // Create if doesn't exist
        collection_store.insert(id.clone(), Arc::new(Document::new(id.clone(), fields.clone())));
        Ok(id)
    }

    #[instrument(skip(self, updates))]
    async fn update(
        &self,
        collection_name: &str,
        id: &DocumentId,
        updates: &Fields,
    ) -> Result<bool, ApplicationError> {
        debug!(collection = %collection_name, doc_id = %id, "Merging fields into in-memory document");
        let Some(collection_store) = self.store.get(collection_name) else {
            return Ok(false);
        };
        let Some(mut doc_ref) = collection_store.get_mut(id) else {
            return Ok(false);
        };
        Arc::make_mut(doc_ref.value_mut()).merge(updates.clone())?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<bool, ApplicationError> {
        debug!(collection = %collection_name, doc_id = %id, "Deleting document from in-memory store");
        match self.store.get(collection_name) {
            Some(collection_store) => Ok(collection_store.remove(id).is_some()),
            None => Ok(false), // Collection or document doesn't exist
        }
    }

    #[instrument(skip(self))]
    async fn count(&self, collection_name: &str) -> Result<u64, ApplicationError> {
        let count = self
            .store
            .get(collection_name)
            .map_or(0, |collection_store| collection_store.len());
        Ok(count as u64)
    }

    #[instrument(skip(self))]
    async fn list_ordered(
        &self,
        collection_name: &str,
        sort: &SortBy,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApplicationError> {
        let mut documents = self.snapshot(collection_name);
        sort_documents(&mut documents, std::slice::from_ref(sort));
        Ok(documents.into_iter().skip(offset).take(limit).collect())
    }

    #[instrument(skip(self, value))]
    async fn find_by_field(
        &self,
        collection_name: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, ApplicationError> {
        let matches: Vec<Document> = self
            .snapshot(collection_name)
            .into_iter()
            .filter(|doc| doc.get_field_value(field) == Some(value))
            .collect();
        debug!(collection = %collection_name, field, count = matches.len(), "Equality query on in-memory store");
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn fields(value: Value) -> Fields {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn add_then_get_returns_same_fields() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .add("books", &fields(json!({"fileName": "a"})))
            .await
            .unwrap();
        let doc = store.get("books", &id).await.unwrap().unwrap();
        assert_eq!(doc.id(), &id);
        assert_eq!(doc.text("fileName"), Some("a"));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = InMemoryDocumentStore::new();
        let a = store.add("c", &HashMap::new()).await.unwrap();
        let b = store.add("c", &HashMap::new()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_document_is_none_not_error() {
        let store = InMemoryDocumentStore::new();
        assert!(store.get("nothing", &DocumentId::from("x")).await.unwrap().is_none());
        assert!(!store.delete("nothing", &DocumentId::from("x")).await.unwrap());
        assert!(
            !store
                .update("nothing", &DocumentId::from("x"), &HashMap::new())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .add("c", &fields(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        assert!(store.update("c", &id, &fields(json!({"b": 3, "c": 4}))).await.unwrap());
        let doc = store.get("c", &id).await.unwrap().unwrap();
        assert_eq!(doc.fields(), &fields(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[tokio::test]
    async fn deleted_document_stays_gone() {
        let store = InMemoryDocumentStore::new();
        let id = store.add("c", &HashMap::new()).await.unwrap();
        assert!(store.delete("c", &id).await.unwrap());
        assert!(store.get("c", &id).await.unwrap().is_none());
        assert_eq!(store.count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_ordered_windows_sorted_collection() {
        let store = InMemoryDocumentStore::new();
        for name in ["delta", "alpha", "charlie", "bravo"] {
            store.add("c", &fields(json!({"fileName": name}))).await.unwrap();
        }
        let window = store
            .list_ordered("c", &SortBy::asc("fileName"), 2, 1)
            .await
            .unwrap();
        let names: Vec<_> = window.iter().filter_map(|d| d.text("fileName")).collect();
        assert_eq!(names, vec!["bravo", "charlie"]);

        let newest_first = store
            .list_ordered("c", &SortBy::desc("fileName"), 10, 0)
            .await
            .unwrap();
        assert_eq!(newest_first[0].text("fileName"), Some("delta"));
    }

    #[tokio::test]
    async fn find_by_field_is_exact_match() {
        let store = InMemoryDocumentStore::new();
        store.add("t", &fields(json!({"originalText": "Hello"}))).await.unwrap();
        store.add("t", &fields(json!({"originalText": "hello"}))).await.unwrap();
        let found = store
            .find_by_field("t", "originalText", &json!("Hello"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(
            store
                .find_by_field("t", "originalText", &json!("Hello "))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
