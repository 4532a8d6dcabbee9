use application::{ApplicationError, DocumentStore, SortBy, SortOrder};
use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, doc, oid::ObjectId};
use domain::{Document, DocumentId, Fields};
use futures::stream::TryStreamExt;
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// Document store backed by MongoDB. Ids are the hex form of `_id`.
#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    db: Database,
}

impl MongoDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn connect(uri: &str, database: &str) -> Result<Self, ApplicationError> {
        let client = Client::with_uri_str(uri).await.map_err(store_error)?;
        info!(database, "Connected to MongoDB");
        Ok(Self::new(client.database(database)))
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.db.collection::<BsonDocument>(name)
    }
}

fn store_error(e: mongodb::error::Error) -> ApplicationError {
    ApplicationError::StoreFailure(e.to_string())
}

/// Ids that are not valid ObjectIds cannot exist in the store.
fn object_id(id: &DocumentId) -> Option<ObjectId> {
    ObjectId::parse_str(id.as_str()).ok()
}

fn to_bson_fields(fields: &Fields) -> Result<BsonDocument, ApplicationError> {
    bson::to_document(fields)
        .map_err(|e| ApplicationError::StoreFailure(format!("Failed to encode fields: {}", e)))
}

fn from_bson(mut raw: BsonDocument) -> Result<Document, ApplicationError> {
    let id = match raw.remove("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) => s,
        Some(other) => other.to_string(),
        None => {
            return Err(ApplicationError::StoreFailure(
                "Stored document has no _id".to_string(),
            ));
        }
    };
    let fields: Fields = raw
        .into_iter()
        .map(|(name, value)| (name, value.into_relaxed_extjson()))
        .collect();
    Ok(Document::new(DocumentId::new(id), fields))
}

async fn collect_documents(
    cursor: mongodb::Cursor<BsonDocument>,
) -> Result<Vec<Document>, ApplicationError> {
    let raw: Vec<BsonDocument> = cursor.try_collect().await.map_err(store_error)?;
    raw.into_iter().map(from_bson).collect()
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    #[instrument(skip(self))]
    async fn get_all(&self, collection_name: &str) -> Result<Vec<Document>, ApplicationError> {
        let cursor = self
            .collection(collection_name)
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .await
            .map_err(store_error)?;
        let documents = collect_documents(cursor).await?;
        debug!(collection = %collection_name, count = documents.len(), "Read whole collection from MongoDB");
        Ok(documents)
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, ApplicationError> {
        let Some(oid) = object_id(id) else {
            debug!(doc_id = %id, "Not an ObjectId, treating as missing");
            return Ok(None);
        };
        self.collection(collection_name)
            .find_one(doc! { "_id": oid })
            .await
            .map_err(store_error)?
            .map(from_bson)
            .transpose()
    }

    #[instrument(skip(self, fields))]
    async fn add(
        &self,
        collection_name: &str,
        fields: &Fields,
    ) -> Result<DocumentId, ApplicationError> {
        let result = self
            .collection(collection_name)
            .insert_one(to_bson_fields(fields)?)
            .await
            .map_err(store_error)?;
        match result.inserted_id {
            Bson::ObjectId(oid) => Ok(DocumentId::new(oid.to_hex())),
            other => {
                warn!(collection = %collection_name, inserted_id = %other, "Unexpected inserted id type");
                Ok(DocumentId::new(other.to_string()))
            }
        }
    }

    #[instrument(skip(self, updates))]
    async fn update(
        &self,
        collection_name: &str,
        id: &DocumentId,
        updates: &Fields,
    ) -> Result<bool, ApplicationError> {
        let Some(oid) = object_id(id) else {
            return Ok(false);
        };
        let collection = self.collection(collection_name);
        if updates.is_empty() {
            // An empty $set is rejected by the server
            let existing = collection
                .count_documents(doc! { "_id": oid })
                .await
                .map_err(store_error)?;
            return Ok(existing > 0);
        }
        let result = collection
            .update_one(doc! { "_id": oid }, doc! { "$set": to_bson_fields(updates)? })
            .await
            .map_err(store_error)?;
        Ok(result.matched_count > 0)
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<bool, ApplicationError> {
        let Some(oid) = object_id(id) else {
            return Ok(false);
        };
        let result = self
            .collection(collection_name)
            .delete_one(doc! { "_id": oid })
            .await
            .map_err(store_error)?;
        Ok(result.deleted_count > 0)
    }

    #[instrument(skip(self))]
    async fn count(&self, collection_name: &str) -> Result<u64, ApplicationError> {
        self.collection(collection_name)
            .count_documents(doc! {})
            .await
            .map_err(store_error)
    }

    #[instrument(skip(self))]
    async fn list_ordered(
        &self,
        collection_name: &str,
        sort: &SortBy,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApplicationError> {
        let direction = match sort.order {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        };
        let mut sort_keys = BsonDocument::new();
        sort_keys.insert(sort.field.as_str(), direction);
        sort_keys.insert("_id", 1);

        let cursor = self
            .collection(collection_name)
            .find(doc! {})
            .sort(sort_keys)
            .skip(offset as u64)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(store_error)?;
        collect_documents(cursor).await
    }

    #[instrument(skip(self, value))]
    async fn find_by_field(
        &self,
        collection_name: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, ApplicationError> {
        let value = bson::to_bson(value)
            .map_err(|e| ApplicationError::StoreFailure(format!("Failed to encode value: {}", e)))?;
        let mut filter = BsonDocument::new();
        filter.insert(field, value);
        let cursor = self
            .collection(collection_name)
            .find(filter)
            .sort(doc! { "_id": 1 })
            .await
            .map_err(store_error)?;
        collect_documents(cursor).await
    }
}
