use application::{
    ApplicationError, CLIENT_LOGS_COLLECTION, ClientLog, ClientLogService, ConversionApi,
    DocumentService, DocumentStore, FILES_COLLECTION, FileMeta, FileUploadService, LogLevel,
    LogQuery, Projection, RequestContext, SortBy, TRANSLATIONS_COLLECTION, TranslationApi,
    TranslationService,
};
use async_trait::async_trait;
use domain::{Fields, PageRequest};
use infrastructure::{InMemoryDocumentStore, LinearScanIndex};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// --- Test doubles ---

struct CountingTranslator {
    calls: AtomicUsize,
    reply: String,
}

impl CountingTranslator {
    fn new(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl TranslationApi for CountingTranslator {
    async fn translate(&self, _text: &str) -> Result<String, ApplicationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct FailingTranslator;

#[async_trait]
impl TranslationApi for FailingTranslator {
    async fn translate(&self, _text: &str) -> Result<String, ApplicationError> {
        Err(ApplicationError::UpstreamFailure {
            service: "translator",
            reason: "503".to_string(),
        })
    }
}

struct StaticConverter(Result<String, ()>);

#[async_trait]
impl ConversionApi for StaticConverter {
    async fn convert(&self, _file_name: &str, _bytes: Vec<u8>) -> Result<String, ApplicationError> {
        self.0.clone().map_err(|_| ApplicationError::UpstreamFailure {
            service: "converter",
            reason: "500".to_string(),
        })
    }
}

// --- Helpers ---

fn fields(value: Value) -> Fields {
    serde_json::from_value(value).unwrap()
}

fn setup() -> (Arc<InMemoryDocumentStore>, Arc<DocumentService>) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let index = Arc::new(LinearScanIndex::new(store.clone()));
    let documents = Arc::new(DocumentService::new(store.clone(), index));
    (store, documents)
}

async fn seed(store: &InMemoryDocumentStore, collection: &str, docs: Vec<Value>) {
    for value in docs {
        store.add(collection, &fields(value)).await.unwrap();
    }
}

fn names(page: &domain::Page<domain::Document>) -> Vec<String> {
    let mut names: Vec<String> = page
        .items
        .iter()
        .filter_map(|d| d.text("fileName").map(str::to_string))
        .collect();
    names.sort();
    names
}

// --- Search and visibility ---

#[tokio::test]
async fn search_is_case_insensitive_substring_over_public_documents() {
    let (store, documents) = setup();
    seed(
        &store,
        FILES_COLLECTION,
        vec![
            json!({"fileName": "Alpha", "isPublic": true}),
            json!({"fileName": "Echo", "isPublic": true}),
            json!({"fileName": "Gamma", "isPublic": true}),
        ],
    )
    .await;

    let page = documents
        .search_visible(FILES_COLLECTION, "a", "", PageRequest::clamped(Some(1), Some(10), 10))
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Alpha", "Gamma"]);
    assert_eq!(page.meta.total_elements, 2);

    // Every name containing the letter matches, regardless of case.
    store
        .add(FILES_COLLECTION, &fields(json!({"fileName": "Beta", "isPublic": true})))
        .await
        .unwrap();
    let page = documents
        .search_visible(FILES_COLLECTION, "A", "", PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Alpha", "Beta", "Gamma"]);
}

#[tokio::test]
async fn empty_query_returns_every_accessible_document() {
    let (store, documents) = setup();
    seed(
        &store,
        FILES_COLLECTION,
        vec![
            json!({"fileName": "a", "isPublic": true}),
            json!({"fileName": "b", "isPublic": true}),
            json!({"fileName": "hidden", "isPublic": false, "uploaderUid": "u9"}),
        ],
    )
    .await;
    let page = documents
        .search_visible(FILES_COLLECTION, "   ", "", PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["a", "b"]);
}

#[tokio::test]
async fn private_document_is_listed_only_for_its_owner() {
    let (store, documents) = setup();
    seed(
        &store,
        FILES_COLLECTION,
        vec![
            json!({"fileName": "public", "isPublic": true, "content": "body"}),
            json!({"fileName": "mine", "isPublic": false, "uploaderUid": "u1", "content": "secret"}),
        ],
    )
    .await;

    let anonymous = documents
        .list_visible(FILES_COLLECTION, "", PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(names(&anonymous), vec!["public"]);

    let owner = documents
        .list_visible(FILES_COLLECTION, "u1", PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(names(&owner), vec!["mine", "public"]);
    // Listings never carry the body
    assert!(owner.items.iter().all(|d| d.get_field_value("content").is_none()));

    let other = documents
        .list_visible(FILES_COLLECTION, "u2", PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(names(&other), vec!["public"]);
}

// --- Pagination ---

#[tokio::test]
async fn total_elements_is_stable_across_pages() {
    let (store, documents) = setup();
    let docs = (0..23)
        .map(|i| json!({"fileName": format!("file {:02}", i), "isPublic": true}))
        .collect();
    seed(&store, FILES_COLLECTION, docs).await;

    let mut seen = 0;
    for page_number in 1..=4 {
        let page = documents
            .list_documents(
                FILES_COLLECTION,
                &SortBy::asc("fileName"),
                PageRequest::new(page_number, 10),
                Projection::WithoutContent,
            )
            .await
            .unwrap();
        assert!(page.items.len() <= 10);
        assert_eq!(page.meta.total_elements, 23);
        assert_eq!(page.meta.total_pages(), 3);
        seen += page.items.len();
    }
    assert_eq!(seen, 23);

    let searched = documents
        .search_documents(FILES_COLLECTION, "file", PageRequest::new(3, 10), Projection::Full)
        .await
        .unwrap();
    assert_eq!(searched.items.len(), 3);
    assert_eq!(searched.meta.total_elements, 23);
}

#[tokio::test]
async fn page_past_the_end_is_empty_not_an_error() {
    let (store, documents) = setup();
    seed(&store, "ifiles", vec![json!({"fileName": "only"})]).await;
    let page = documents
        .search_documents("ifiles", "", PageRequest::new(5, 10), Projection::Full)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.meta.total_elements, 1);
}

// --- CRUD ---

#[tokio::test]
async fn update_merges_and_delete_removes() {
    let (_store, documents) = setup();
    let id = documents
        .add_document("ifiles", fields(json!({"fileName": "a", "category": "poetry"})))
        .await
        .unwrap();

    assert!(
        documents
            .update_document("ifiles", id.as_str(), fields(json!({"category": "prose"})))
            .await
            .unwrap()
    );
    let doc = documents
        .get_document("ifiles", id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.text("fileName"), Some("a"));
    assert_eq!(doc.text("category"), Some("prose"));

    assert!(documents.delete_document("ifiles", id.as_str()).await.unwrap());
    assert!(documents.get_document("ifiles", id.as_str()).await.unwrap().is_none());
    assert!(!documents.delete_document("ifiles", id.as_str()).await.unwrap());
    assert!(
        !documents
            .update_document("ifiles", id.as_str(), fields(json!({"x": 1})))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn document_id_cannot_be_written() {
    let (_store, documents) = setup();
    let err = documents
        .add_document("ifiles", fields(json!({"documentId": "forged"})))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::DomainError(_)));
}

// --- Translation cache ---

#[tokio::test]
async fn second_translation_of_same_text_comes_from_cache() {
    let (store, _documents) = setup();
    let api = Arc::new(CountingTranslator::new("Balochi: \"سلام\""));
    let service = TranslationService::new(store.clone(), api.clone(), "Balochi");

    let first = service.translate("Hello").await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.translated_text, "سلام");
    assert_eq!(first.original_text, "Hello");

    let second = service.translate("Hello").await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.translated_text, first.translated_text);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);

    // Exact match only
    let third = service.translate("hello").await.unwrap();
    assert!(!third.from_cache);
    assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.count(TRANSLATIONS_COLLECTION).await.unwrap(), 2);
}

#[tokio::test]
async fn failed_translation_caches_nothing() {
    let (store, _documents) = setup();
    let service = TranslationService::new(store.clone(), Arc::new(FailingTranslator), "Balochi");
    let err = service.translate("Hello").await.unwrap_err();
    assert!(matches!(err, ApplicationError::UpstreamFailure { .. }));
    assert_eq!(store.count(TRANSLATIONS_COLLECTION).await.unwrap(), 0);
}

#[tokio::test]
async fn blank_text_is_rejected_before_calling_the_api() {
    let (store, _documents) = setup();
    let api = Arc::new(CountingTranslator::new("x"));
    let service = TranslationService::new(store, api.clone(), "Balochi");
    assert!(matches!(
        service.translate("  ").await,
        Err(ApplicationError::InvalidInput(_))
    ));
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
}

// --- Upload ---

#[tokio::test]
async fn upload_stores_converted_content_with_metadata() {
    let (store, _documents) = setup();
    let service = FileUploadService::new(
        store.clone(),
        Arc::new(StaticConverter(Ok("converted text".to_string()))),
    );
    let meta: FileMeta = serde_json::from_value(json!({
        "file_description": "a tale",
        "category": "story",
        "authors": ["A", "B"],
        "isPublic": true,
        "uploaderUid": "u1"
    }))
    .unwrap();
    let document = service
        .upload(
            application::UploadedFile {
                file_name: "tale.inp".to_string(),
                bytes: vec![1, 2, 3],
            },
            meta,
        )
        .await
        .unwrap();

    let stored = store
        .get(FILES_COLLECTION, document.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.text("fileName"), Some("tale.inp"));
    assert_eq!(stored.text("content"), Some("converted text"));
    assert_eq!(stored.get_field_value("authorName"), Some(&json!(["A", "B"])));
    assert!(stored.flag_or("isPublic", false));
    assert_eq!(stored.text("uploaderUid"), Some("u1"));
    assert!(stored.get_field_value("uploadDate").is_some_and(Value::is_i64));
}

#[tokio::test]
async fn failed_conversion_stores_nothing() {
    let (store, _documents) = setup();
    let service = FileUploadService::new(store.clone(), Arc::new(StaticConverter(Err(()))));
    let result = service
        .upload(
            application::UploadedFile {
                file_name: "bad.inp".to_string(),
                bytes: Vec::new(),
            },
            FileMeta::default(),
        )
        .await;
    assert!(matches!(result, Err(ApplicationError::UpstreamFailure { .. })));
    assert_eq!(store.count(FILES_COLLECTION).await.unwrap(), 0);
}

// --- Client logs ---

fn log(level: Option<LogLevel>, user: &str, timestamp: &str, message: &str) -> ClientLog {
    ClientLog {
        level,
        user_id: Some(user.to_string()),
        timestamp: Some(timestamp.parse().unwrap()),
        message: Some(message.to_string()),
        ..ClientLog::default()
    }
}

#[tokio::test]
async fn batch_counts_failures_without_aborting() {
    let (store, documents) = setup();
    let logs = ClientLogService::new(documents);
    let response = logs
        .record_batch(
            vec![
                json!({"level": "INFO", "user_id": "u1", "message": "one"}),
                json!({"user_id": "u1", "message": "no level"}),
                json!({"level": "TRACE", "message": "unknown level"}),
                json!({"level": "WARN", "timestamp": "yesterday"}),
                json!("not an object"),
                json!({"level": "ERROR", "user_id": "u2", "timestamp": "2024-03-01T10:02:00Z"}),
            ],
            &RequestContext::default(),
        )
        .await;
    assert!(response.success);
    assert_eq!(response.success_count, 2);
    assert_eq!(response.error_count, 4);
    assert_eq!(response.message, "Processed 6 logs: 2 successful, 4 failed");
    assert_eq!(store.count(CLIENT_LOGS_COLLECTION).await.unwrap(), 2);
}

#[tokio::test]
async fn logs_are_filtered_and_counted() {
    let (_store, documents) = setup();
    let logs = ClientLogService::new(documents);
    let context = RequestContext {
        user_agent: Some("test-agent".to_string()),
        url: None,
        session_id: Some("s1".to_string()),
    };
    for (level, user, ts) in [
        (LogLevel::Error, "u1", "2024-03-01T10:00:00Z"),
        (LogLevel::Warn, "u1", "2024-03-02T10:00:00Z"),
        (LogLevel::Info, "u2", "2024-03-03T10:00:00Z"),
        (LogLevel::Debug, "u1", "2024-04-01T10:00:00Z"),
    ] {
        let entry = log(None, user, ts, "m");
        // The route level wins over the entry
        let receipt = logs.record(entry, level, &context).await.unwrap();
        assert!(receipt.success);
    }

    let all = logs
        .list(&LogQuery::default(), PageRequest::new(1, 50))
        .await
        .unwrap();
    assert_eq!(all.meta.total_elements, 4);
    assert_eq!(all.items[0].text("level"), Some("DEBUG"));
    assert_eq!(all.items[0].text("userAgent"), Some("test-agent"));
    assert_eq!(all.items[0].text("timestamp"), Some("2024-04-01T10:00:00.000Z"));

    let u1_march = LogQuery {
        user_id: Some("u1".to_string()),
        start_date: Some("2024-03-01T00:00:00Z".to_string()),
        end_date: Some("2024-03-31T23:59:59Z".to_string()),
        ..LogQuery::default()
    };
    let page = logs.list(&u1_march, PageRequest::new(1, 50)).await.unwrap();
    let levels: Vec<_> = page.items.iter().filter_map(|d| d.text("level")).collect();
    assert_eq!(levels, vec!["WARN", "ERROR"]);

    let errors = LogQuery {
        level: Some("error".to_string()),
        ..LogQuery::default()
    };
    assert_eq!(
        logs.list(&errors, PageRequest::new(1, 50)).await.unwrap().meta.total_elements,
        1
    );

    let stats = logs.stats(&LogQuery::default()).await.unwrap();
    assert_eq!(stats.total_logs, 4);
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.warning_count, 1);
    assert_eq!(stats.info_count, 1);
    assert_eq!(stats.debug_count, 1);

    let u1_stats = logs.stats(&u1_march).await.unwrap();
    assert_eq!(u1_stats.total_logs, 2);
}

#[tokio::test]
async fn unknown_log_level_filter_is_invalid_input() {
    let (_store, documents) = setup();
    let logs = ClientLogService::new(documents);
    let query = LogQuery {
        level: Some("verbose".to_string()),
        ..LogQuery::default()
    };
    assert!(matches!(
        logs.list(&query, PageRequest::new(1, 10)).await,
        Err(ApplicationError::InvalidInput(_))
    ));
}
