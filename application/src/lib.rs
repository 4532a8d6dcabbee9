use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use domain::{
    Document, DocumentId, DomainError, Fields, Page, PageRequest, TranslationRecord, field,
    normalize_translation,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Documents produced by the conversion API.
pub const FILES_COLLECTION: &str = "inpage_converted_files";
/// Translation cache, keyed by exact original text.
pub const TRANSLATIONS_COLLECTION: &str = "Translations";
pub const FEEDBACK_COLLECTION: &str = "feedback";
pub const CLIENT_LOGS_COLLECTION: &str = "client_logs";

pub const DEFAULT_LOG_PAGE_SIZE: u32 = 50;

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Upstream service '{service}' failed: {reason}")]
    UpstreamFailure {
        service: &'static str,
        reason: String,
    },
    #[error("Document store error: {0}")]
    StoreFailure(String),
    #[error("Document store operation '{operation}' timed out after {timeout_ms} ms")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u128,
    },
    #[error("Domain validation error: {0}")]
    DomainError(#[from] DomainError), // Propagate domain errors cleanly
}

// --- Sorting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub field: String,
    pub order: SortOrder,
}

impl SortBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }
    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Desc,
        }
    }
}

// --- Infrastructure Interfaces (Traits) ---

/// Interface to the external document store. Collections are created
/// implicitly on first write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document of a collection.
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, ApplicationError>;
    /// A single document, or `None` when the id is unknown.
    async fn get(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, ApplicationError>;
    /// Stores a new document and returns its store-assigned id.
    async fn add(&self, collection: &str, fields: &Fields) -> Result<DocumentId, ApplicationError>;
    /// Merges `updates` into an existing document. Returns false if it does not exist.
    async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        updates: &Fields,
    ) -> Result<bool, ApplicationError>;
    /// Deletes a document. Returns true if it existed.
    async fn delete(&self, collection: &str, id: &DocumentId) -> Result<bool, ApplicationError>;
    /// Number of documents in a collection.
    async fn count(&self, collection: &str) -> Result<u64, ApplicationError>;
    /// A window of the collection ordered by `sort`.
    async fn list_ordered(
        &self,
        collection: &str,
        sort: &SortBy,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApplicationError>;
    /// Documents whose `field` equals `value`.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, ApplicationError>;
}

/// Who may see the documents a search returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// No visibility rule applied.
    Unrestricted,
    /// Public documents plus those uploaded by the caller (empty = anonymous).
    VisibleTo(String),
}

#[derive(Debug, Clone)]
pub struct SearchCriteria {
    /// Free-text query; empty matches everything.
    pub query: String,
    pub access: Access,
    /// Field conditions: equality, `{gte,lte,gt,lt}` ranges, or any-of arrays.
    pub filters: Fields,
    pub sort: Vec<SortBy>,
}

impl SearchCriteria {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            access: Access::Unrestricted,
            filters: HashMap::new(),
            sort: Vec::new(),
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_filter(mut self, field: &str, condition: Value) -> Self {
        self.filters.insert(field.to_string(), condition);
        self
    }

    pub fn with_sort(mut self, sort: SortBy) -> Self {
        self.sort.push(sort);
        self
    }
}

#[derive(Debug)]
pub struct SearchResult {
    /// Documents matching the criteria for the requested window.
    pub documents: Vec<Document>,
    /// Total number of documents matching the criteria before pagination.
    pub total_hits: usize,
}

/// Interface for the search backend. The shipped implementation is a linear
/// scan; an indexed backend can replace it without touching the services.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        criteria: &SearchCriteria,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResult, ApplicationError>;
}

/// External API turning uploaded files into unicode text.
#[async_trait]
pub trait ConversionApi: Send + Sync {
    async fn convert(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ApplicationError>;
}

/// External chat-completion API. Returns the raw model reply.
#[async_trait]
pub trait TranslationApi: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, ApplicationError>;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationResponse {
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

#[derive(Serialize, Debug)]
pub struct PaginatedResponse {
    pub data: Vec<Map<String, Value>>,
    pub pagination: PaginationResponse,
}

impl From<Page<Document>> for PaginatedResponse {
    fn from(page: Page<Document>) -> Self {
        let pagination = PaginationResponse {
            page: page.meta.page,
            size: page.meta.size,
            total_elements: page.meta.total_elements,
            total_pages: page.meta.total_pages(),
        };
        Self {
            data: page.items.into_iter().map(Document::into_response).collect(),
            pagination,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub original_text: String,
    pub translated_text: String,
    pub from_cache: bool,
    pub document_id: String,
}

/// Metadata sent alongside an uploaded file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FileMeta {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(
        default,
        rename = "isPublic",
        alias = "is_public",
        deserialize_with = "null_as_false"
    )]
    pub is_public: bool,
    #[serde(default, rename = "uploaderEmail", alias = "uploader_email")]
    pub uploader_email: Option<String>,
    #[serde(default, rename = "uploaderUid", alias = "uploader_uid")]
    pub uploader_uid: Option<String>,
}

/// An explicit `null` reads as `false`.
fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Debug)]
pub struct FeedbackResponse {
    pub status: String,
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// A log entry reported by a browser client.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ClientLog {
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Option<LogLevel>,
    pub message: Option<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub session_id: Option<String>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub error_stack: Option<String>,
    pub additional_data: Option<Map<String, Value>>,
    pub client_version: Option<String>,
    pub environment: Option<String>,
}

/// Request details used to fill in what a client log entry left out.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogReceipt {
    pub success: bool,
    pub message: String,
    pub log_id: String,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    pub message: String,
    pub success_count: usize,
    pub error_count: usize,
}

/// Optional filters for listing client logs. Dates are RFC 3339.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub level: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Serialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total_logs: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub debug_count: usize,
}

/// Whether listed documents keep their `content` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Full,
    WithoutContent,
}

impl Projection {
    fn apply(self, document: Document) -> Document {
        match self {
            Projection::Full => document,
            Projection::WithoutContent => document.without_content(),
        }
    }
}

// --- Application Services (Use Cases) ---

/// List, search and CRUD over any collection.
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn SearchIndex>,
}

impl DocumentService {
    pub fn new(store: Arc<dyn DocumentStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self { store, index }
    }

    /// Unfiltered listing. The total comes from a collection count and the
    /// window from an ordered limit/offset query, so the collection is never
    /// loaded whole.
    #[instrument(skip(self, page), fields(page_number = page.page(), page_size = page.size()))]
    pub async fn list_documents(
        &self,
        collection: &str,
        sort: &SortBy,
        page: PageRequest,
        projection: Projection,
    ) -> Result<Page<Document>, ApplicationError> {
        info!(collection = %collection, "Listing documents");
        let total_elements = self.store.count(collection).await?;
        let documents = self
            .store
            .list_ordered(collection, sort, page.limit(), page.offset())
            .await?;
        debug!(collection = %collection, total_elements, returned = documents.len(), "Ordered window fetched");
        Ok(Page::new(documents, page, total_elements).map(|d| projection.apply(d)))
    }

    /// Documents visible to `caller_id`, without their content.
    pub async fn list_visible(
        &self,
        collection: &str,
        caller_id: &str,
        page: PageRequest,
    ) -> Result<Page<Document>, ApplicationError> {
        let criteria = SearchCriteria::new("").with_access(Access::VisibleTo(caller_id.to_string()));
        self.query(collection, &criteria, page, Projection::WithoutContent)
            .await
    }

    /// Free-text search over every document of the collection.
    pub async fn search_documents(
        &self,
        collection: &str,
        query: &str,
        page: PageRequest,
        projection: Projection,
    ) -> Result<Page<Document>, ApplicationError> {
        let criteria = SearchCriteria::new(query);
        self.query(collection, &criteria, page, projection).await
    }

    /// Free-text search restricted to documents visible to `caller_id`,
    /// without their content.
    pub async fn search_visible(
        &self,
        collection: &str,
        query: &str,
        caller_id: &str,
        page: PageRequest,
    ) -> Result<Page<Document>, ApplicationError> {
        let criteria =
            SearchCriteria::new(query).with_access(Access::VisibleTo(caller_id.to_string()));
        self.query(collection, &criteria, page, Projection::WithoutContent)
            .await
    }

    /// Runs `criteria` through the search backend and pages the result.
    #[instrument(skip(self, criteria, page), fields(query = %criteria.query, page_number = page.page(), page_size = page.size()))]
    pub async fn query(
        &self,
        collection: &str,
        criteria: &SearchCriteria,
        page: PageRequest,
        projection: Projection,
    ) -> Result<Page<Document>, ApplicationError> {
        let start_time = Instant::now();
        let result = self
            .index
            .search(collection, criteria, page.offset(), page.limit())
            .await
            .map_err(|e| {
                error!(collection = %collection, "Search failed: {}", e);
                e
            })?;
        info!(
            collection = %collection,
            total_hits = result.total_hits,
            returned_hits = result.documents.len(),
            time_ms = start_time.elapsed().as_millis(),
            "Search successful"
        );
        Ok(Page::new(result.documents, page, result.total_hits as u64).map(|d| projection.apply(d)))
    }

    #[instrument(skip(self))]
    pub async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, ApplicationError> {
        let document = self.store.get(collection, &DocumentId::from(id)).await?;
        if document.is_none() {
            info!(collection = %collection, doc_id = %id, "Document not found");
        }
        Ok(document)
    }

    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    pub async fn add_document(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Result<DocumentId, ApplicationError> {
        domain::ensure_writable(&fields)?;
        let id = self.store.add(collection, &fields).await.map_err(|e| {
            error!(collection = %collection, "Failed to add document: {}", e);
            e
        })?;
        info!(collection = %collection, doc_id = %id, "Document added");
        Ok(id)
    }

    /// Field-level merge. Returns false when the document does not exist.
    #[instrument(skip(self, updates), fields(field_count = updates.len()))]
    pub async fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Fields,
    ) -> Result<bool, ApplicationError> {
        domain::ensure_writable(&updates)?;
        let updated = self
            .store
            .update(collection, &DocumentId::from(id), &updates)
            .await?;
        if updated {
            info!(collection = %collection, doc_id = %id, "Document updated");
        } else {
            warn!(collection = %collection, doc_id = %id, "Update skipped: document not found");
        }
        Ok(updated)
    }

    /// Deletes a document. Deleting an unknown id is not an error.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<bool, ApplicationError> {
        let deleted = self.store.delete(collection, &DocumentId::from(id)).await?;
        if deleted {
            info!(collection = %collection, doc_id = %id, "Document deleted");
        } else {
            info!(collection = %collection, doc_id = %id, "Document not found for deletion (already deleted or never existed)");
        }
        Ok(deleted)
    }
}

/// Lookup-or-create translation cache over [`TRANSLATIONS_COLLECTION`].
///
/// Lookup and insert are not serialized: two concurrent misses for the same
/// text both call the API and both store a record. A later lookup returns
/// whichever record the store yields first.
pub struct TranslationService {
    store: Arc<dyn DocumentStore>,
    api: Arc<dyn TranslationApi>,
    /// Language name whose `"<language>: "` prefix is stripped from replies.
    language: String,
}

impl TranslationService {
    pub fn new(store: Arc<dyn DocumentStore>, api: Arc<dyn TranslationApi>, language: &str) -> Self {
        Self {
            store,
            api,
            language: language.to_string(),
        }
    }

    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn translate(&self, text: &str) -> Result<TranslateResponse, ApplicationError> {
        if text.trim().is_empty() {
            return Err(ApplicationError::InvalidInput(
                "Text to translate cannot be empty".to_string(),
            ));
        }
        info!("Translate request received");

        // 1. Exact-match lookup
        let existing = self
            .store
            .find_by_field(
                TRANSLATIONS_COLLECTION,
                field::ORIGINAL_TEXT,
                &Value::String(text.to_string()),
            )
            .await?;
        if let Some(document) = existing.first() {
            match TranslationRecord::from_document(document) {
                Ok(record) => {
                    info!(doc_id = %document.id(), "Found existing translation");
                    return Ok(TranslateResponse {
                        original_text: record.original_text,
                        translated_text: record.translated_text,
                        from_cache: true,
                        document_id: document.id().to_string(),
                    });
                }
                Err(e) => {
                    warn!(doc_id = %document.id(), "Ignoring malformed cached translation: {}", e);
                }
            }
        }

        // 2. Miss: ask the model
        info!("No existing translation found, making new translation request");
        let raw = self.api.translate(text).await?;
        let translated_text = normalize_translation(&raw, &self.language);
        debug!(raw = %raw, cleaned = %translated_text, "Translation reply normalized");

        // 3. Persist
        let record = TranslationRecord {
            original_text: text.to_string(),
            translated_text,
            timestamp: Utc::now().timestamp_millis(),
        };
        let id = self
            .store
            .add(TRANSLATIONS_COLLECTION, &record.to_fields())
            .await?;
        info!(doc_id = %id, "Translation stored");

        Ok(TranslateResponse {
            original_text: record.original_text,
            translated_text: record.translated_text,
            from_cache: false,
            document_id: id.into(),
        })
    }
}

/// Converts uploaded files and stores the result with its metadata.
pub struct FileUploadService {
    store: Arc<dyn DocumentStore>,
    converter: Arc<dyn ConversionApi>,
}

impl FileUploadService {
    pub fn new(store: Arc<dyn DocumentStore>, converter: Arc<dyn ConversionApi>) -> Self {
        Self { store, converter }
    }

    /// Nothing is stored unless the conversion succeeds.
    #[instrument(skip(self, file, meta), fields(file_name = %file.file_name, bytes = file.bytes.len()))]
    pub async fn upload(
        &self,
        file: UploadedFile,
        meta: FileMeta,
    ) -> Result<Document, ApplicationError> {
        info!("Uploaded file received");
        let content = self.converter.convert(&file.file_name, file.bytes).await?;

        let file_name = meta.file_name.unwrap_or(file.file_name);
        let fields: Fields = HashMap::from([
            (field::FILE_NAME.to_string(), json!(file_name)),
            (
                field::AUTHOR_NAME.to_string(),
                json!(meta.authors.unwrap_or_default()),
            ),
            (field::DESCRIPTION.to_string(), json!(meta.file_description)),
            (field::CATEGORY.to_string(), json!(meta.category)),
            (field::CONTENT.to_string(), json!(content)),
            (field::IS_PUBLIC.to_string(), json!(meta.is_public)),
            (field::UPLOADER_EMAIL.to_string(), json!(meta.uploader_email)),
            (field::UPLOADER_UID.to_string(), json!(meta.uploader_uid)),
            (
                field::UPLOAD_DATE.to_string(),
                json!(Utc::now().timestamp_millis()),
            ),
        ]);

        let id = self.store.add(FILES_COLLECTION, &fields).await.map_err(|e| {
            error!("Error while saving converted file: {}", e);
            e
        })?;
        info!(doc_id = %id, "Converted file stored");
        Ok(Document::new(id, fields))
    }
}

/// Stores and queries logs reported by browser clients.
pub struct ClientLogService {
    documents: Arc<DocumentService>,
}

impl ClientLogService {
    pub fn new(documents: Arc<DocumentService>) -> Self {
        Self { documents }
    }

    /// Stores one entry at `level`, regardless of the level it carried.
    #[instrument(skip(self, entry, context))]
    pub async fn record(
        &self,
        mut entry: ClientLog,
        level: LogLevel,
        context: &RequestContext,
    ) -> Result<LogReceipt, ApplicationError> {
        entry.level = Some(level);
        let entry = enrich(entry, context);
        let fields = log_fields(entry.clone())?;
        let id = self
            .documents
            .add_document(CLIENT_LOGS_COLLECTION, fields)
            .await?;
        echo_to_server_log(&entry, level);
        Ok(LogReceipt {
            success: true,
            message: "Log saved successfully".to_string(),
            log_id: id.into(),
        })
    }

    /// Each entry is decoded and stored on its own; malformed entries and
    /// failed writes are counted, never fatal.
    #[instrument(skip(self, entries, context), fields(batch_size = entries.len()))]
    pub async fn record_batch(
        &self,
        entries: Vec<Value>,
        context: &RequestContext,
    ) -> BatchResponse {
        let total = entries.len();
        let mut success_count = 0;
        let mut error_count = 0;
        for raw in entries {
            let saved = match decode_log(raw).and_then(|entry| log_fields(enrich(entry, context))) {
                Ok(fields) => self
                    .documents
                    .add_document(CLIENT_LOGS_COLLECTION, fields)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            match saved {
                Ok(()) => success_count += 1,
                Err(e) => {
                    error!("Failed to save log entry: {}", e);
                    error_count += 1;
                }
            }
        }
        info!(total, success_count, error_count, "Batch of client logs processed");
        BatchResponse {
            success: true,
            message: format!(
                "Processed {} logs: {} successful, {} failed",
                total, success_count, error_count
            ),
            success_count,
            error_count,
        }
    }

    /// Newest first. Without filters this is an ordered store query; with
    /// filters the search backend scans the collection.
    pub async fn list(
        &self,
        query: &LogQuery,
        page: PageRequest,
    ) -> Result<Page<Document>, ApplicationError> {
        let criteria = log_criteria(query)?;
        if criteria.filters.is_empty() {
            return self
                .documents
                .list_documents(
                    CLIENT_LOGS_COLLECTION,
                    &SortBy::desc(field::TIMESTAMP),
                    page,
                    Projection::WithoutContent,
                )
                .await;
        }
        self.documents
            .query(
                CLIENT_LOGS_COLLECTION,
                &criteria,
                page,
                Projection::WithoutContent,
            )
            .await
    }

    /// Counts per level over the entries matching `query`.
    pub async fn stats(&self, query: &LogQuery) -> Result<LogStats, ApplicationError> {
        let criteria = log_criteria(query)?;
        let everything = PageRequest::new(1, u32::MAX);
        let page = self
            .documents
            .query(
                CLIENT_LOGS_COLLECTION,
                &criteria,
                everything,
                Projection::WithoutContent,
            )
            .await?;

        let mut stats = LogStats {
            total_logs: page.items.len(),
            ..LogStats::default()
        };
        for document in &page.items {
            match document.text("level").and_then(LogLevel::parse) {
                Some(LogLevel::Error) => stats.error_count += 1,
                Some(LogLevel::Warn) => stats.warning_count += 1,
                Some(LogLevel::Info) => stats.info_count += 1,
                Some(LogLevel::Debug) => stats.debug_count += 1,
                None => {}
            }
        }
        Ok(stats)
    }
}

/// Fills in what the client left out from the request and the clock.
fn enrich(mut entry: ClientLog, context: &RequestContext) -> ClientLog {
    if entry.timestamp.is_none() {
        entry.timestamp = Some(Utc::now());
    }
    if entry.user_agent.is_none() {
        entry.user_agent = context.user_agent.clone();
    }
    if entry.url.is_none() {
        entry.url = context.url.clone();
    }
    if entry.session_id.is_none() {
        entry.session_id = context.session_id.clone();
    }
    entry
}

fn decode_log(raw: Value) -> Result<ClientLog, ApplicationError> {
    serde_json::from_value(raw)
        .map_err(|e| ApplicationError::InvalidInput(format!("Malformed log entry: {}", e)))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Stored shape of a client log. Entries without a level are rejected.
fn log_fields(entry: ClientLog) -> Result<Fields, ApplicationError> {
    let level = entry
        .level
        .ok_or_else(|| ApplicationError::InvalidInput("Log entry has no level".to_string()))?;
    let timestamp = entry.timestamp.unwrap_or_else(Utc::now);
    Ok(HashMap::from([
        ("id".to_string(), json!(entry.id)),
        (field::TIMESTAMP.to_string(), json!(format_timestamp(&timestamp))),
        ("level".to_string(), json!(level.as_str())),
        ("message".to_string(), json!(entry.message)),
        ("userId".to_string(), json!(entry.user_id)),
        ("userEmail".to_string(), json!(entry.user_email)),
        ("sessionId".to_string(), json!(entry.session_id)),
        ("url".to_string(), json!(entry.url)),
        ("userAgent".to_string(), json!(entry.user_agent)),
        ("errorStack".to_string(), json!(entry.error_stack)),
        ("additionalData".to_string(), json!(entry.additional_data)),
        ("clientVersion".to_string(), json!(entry.client_version)),
        ("environment".to_string(), json!(entry.environment)),
        (
            "serverTimestamp".to_string(),
            json!(format_timestamp(&Utc::now())),
        ),
    ]))
}

fn echo_to_server_log(entry: &ClientLog, level: LogLevel) {
    let message = entry.message.as_deref().unwrap_or("");
    let user = entry.user_id.as_deref().unwrap_or("anonymous");
    let url = entry.url.as_deref().unwrap_or("unknown");
    match level {
        LogLevel::Error => error!(user = %user, url = %url, "Client ERROR: {}", message),
        LogLevel::Warn => warn!(user = %user, url = %url, "Client WARN: {}", message),
        LogLevel::Info => info!(user = %user, url = %url, "Client INFO: {}", message),
        LogLevel::Debug => debug!(user = %user, url = %url, "Client DEBUG: {}", message),
    }
}

fn parse_date(name: &str, value: &str) -> Result<String, ApplicationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| format_timestamp(&dt.with_timezone(&Utc)))
        .map_err(|e| ApplicationError::InvalidInput(format!("Invalid {}: '{}' ({})", name, value, e)))
}

/// Translates log query parameters into search criteria, newest first.
fn log_criteria(query: &LogQuery) -> Result<SearchCriteria, ApplicationError> {
    let mut criteria = SearchCriteria::new("").with_sort(SortBy::desc(field::TIMESTAMP));
    if let Some(level) = query.level.as_deref().filter(|l| !l.is_empty()) {
        let level = LogLevel::parse(level)
            .ok_or_else(|| ApplicationError::InvalidInput(format!("Unknown log level '{}'", level)))?;
        criteria = criteria.with_filter("level", json!(level.as_str()));
    }
    if let Some(user_id) = query.user_id.as_deref().filter(|u| !u.is_empty()) {
        criteria = criteria.with_filter("userId", json!(user_id));
    }
    let mut range = Map::new();
    if let Some(start) = query.start_date.as_deref().filter(|d| !d.is_empty()) {
        range.insert("gte".to_string(), json!(parse_date("startDate", start)?));
    }
    if let Some(end) = query.end_date.as_deref().filter(|d| !d.is_empty()) {
        range.insert("lte".to_string(), json!(parse_date("endDate", end)?));
    }
    if !range.is_empty() {
        criteria = criteria.with_filter(field::TIMESTAMP, Value::Object(range));
    }
    Ok(criteria)
}
