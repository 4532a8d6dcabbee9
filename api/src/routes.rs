// ./api/src/routes.rs
use axum::{
    Json, Router, async_trait,
    extract::{
        DefaultBodyLimit, FromRequest, Multipart, OriginalUri, Path, Query, Request, State,
        multipart::MultipartError, rejection::JsonRejection,
    },
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use application::{
    ApplicationError, ClientLog, ClientLogService, DEFAULT_LOG_PAGE_SIZE, DocumentService,
    FEEDBACK_COLLECTION, FILES_COLLECTION, FeedbackResponse, FileMeta, FileUploadService, LogLevel,
    LogQuery, PaginatedResponse, Projection, RequestContext, SortBy, TranslationService,
    UploadedFile,
};
use domain::{DEFAULT_PAGE_SIZE, Fields, PageRequest, field};

use crate::config::AppConfig;

/// Shared services handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub translations: Arc<TranslationService>,
    pub uploads: Arc<FileUploadService>,
    pub client_logs: Arc<ClientLogService>,
}

pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/ping", get(ping))
        .route("/api/v1/translate", post(translate_handler))
        // Converted files, privacy-filtered
        .route("/api/v1/files/list", get(list_files_handler))
        .route("/api/v1/files/search", get(search_files_handler))
        .route("/api/v1/files/upload", post(upload_file_handler))
        .route("/api/v1/files/:document_id", get(get_file_handler))
        // Converted files, unfiltered CRUD
        .route(
            "/api/v1/ifiles",
            get(list_ifiles_handler).post(add_ifile_handler),
        )
        .route("/api/v1/ifiles/search", get(search_ifiles_handler))
        .route(
            "/api/v1/ifiles/:document_id",
            get(get_file_handler)
                .put(update_ifile_handler)
                .delete(delete_ifile_handler),
        )
        .route("/api/v1/feedback", post(feedback_handler))
        // Client logs
        .route("/api/v1/logs/error", post(log_error_handler))
        .route("/api/v1/logs/warn", post(log_warn_handler))
        .route("/api/v1/logs/info", post(log_info_handler))
        .route("/api/v1/logs/debug", post(log_debug_handler))
        .route("/api/v1/logs/batch", post(log_batch_handler))
        .route("/api/v1/logs/list", get(list_logs_handler))
        .route("/api/v1/logs/stats", get(log_stats_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

// --- Request Bodies ---

/// `Json` whose rejections carry the usual `{"error": ...}` body.
struct JsonBody<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!("Rejected request body: {}", rejection.body_text());
                Err(error_body(rejection.status(), rejection.body_text()))
            }
        }
    }
}

// --- Query Parameters ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    page: Option<i64>,
    size: Option<i64>,
    user_uid: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    #[serde(default)]
    query: String,
    page: Option<i64>,
    size: Option<i64>,
    user_uid: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct LogListParams {
    page: Option<i64>,
    size: Option<i64>,
    level: Option<String>,
    user_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl LogListParams {
    fn split(self) -> (PageRequest, LogQuery) {
        let page = PageRequest::clamped(self.page, self.size, DEFAULT_LOG_PAGE_SIZE);
        let query = LogQuery {
            level: self.level,
            user_id: self.user_id,
            start_date: self.start_date,
            end_date: self.end_date,
        };
        (page, query)
    }
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    info!("Health check endpoint called");
    (StatusCode::OK, "OK")
}

async fn ping() -> &'static str {
    "pong"
}

/// Handler for translating raw text (POST /api/v1/translate).
async fn translate_handler(State(state): State<AppState>, text: String) -> Response {
    match state.translations.translate(&text).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            error!("Translation failed via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

// --- File Handlers ---

async fn list_files_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let page = PageRequest::clamped(params.page, params.size, DEFAULT_PAGE_SIZE);
    let caller = params.user_uid.unwrap_or_default();
    info!(page = page.page(), size = page.size(), has_caller = !caller.is_empty(), "Received request to list files");
    match state
        .documents
        .list_visible(FILES_COLLECTION, &caller, page)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(PaginatedResponse::from(page))).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

async fn search_files_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let page = PageRequest::clamped(params.page, params.size, DEFAULT_PAGE_SIZE);
    let caller = params.user_uid.unwrap_or_default();
    info!(query = %params.query, page = page.page(), size = page.size(), "Received request to search files");
    match state
        .documents
        .search_visible(FILES_COLLECTION, &params.query, &caller, page)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(PaginatedResponse::from(page))).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for fetching one converted file, content included.
async fn get_file_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Response {
    info!(doc_id = %document_id, "Received request to get document");
    match state
        .documents
        .get_document(FILES_COLLECTION, &document_id)
        .await
    {
        Ok(Some(document)) => (StatusCode::OK, Json(document.into_response())).into_response(),
        Ok(None) => not_found(&document_id),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for uploading a file (POST /api/v1/files/upload). Expects the
/// multipart fields `file` and `meta` (JSON).
async fn upload_file_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut file: Option<UploadedFile> = None;
    let mut meta: Option<FileMeta> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error_response(e),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        file = Some(UploadedFile {
                            file_name,
                            bytes: bytes.to_vec(),
                        })
                    }
                    Err(e) => return multipart_error_response(e),
                }
            }
            Some("meta") => {
                let text = match field.text().await {
                    Ok(text) => text,
                    Err(e) => return multipart_error_response(e),
                };
                match serde_json::from_str::<FileMeta>(&text) {
                    Ok(parsed) => meta = Some(parsed),
                    Err(e) => {
                        return map_application_error_to_response(ApplicationError::InvalidInput(
                            format!("Invalid meta JSON: {}", e),
                        ));
                    }
                }
            }
            other => debug!(field = ?other, "Ignoring unexpected multipart field"),
        }
    }

    let (Some(file), Some(meta)) = (file, meta) else {
        warn!("Upload is missing the 'file' or 'meta' field");
        return map_application_error_to_response(ApplicationError::InvalidInput(
            "Multipart fields 'file' and 'meta' are required".to_string(),
        ));
    };

    match state.uploads.upload(file, meta).await {
        Ok(document) => (StatusCode::OK, Json(document.into_response())).into_response(),
        Err(e) => {
            error!("Upload failed via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

async fn list_ifiles_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    let page = PageRequest::clamped(params.page, params.size, DEFAULT_PAGE_SIZE);
    match state
        .documents
        .list_documents(
            FILES_COLLECTION,
            &SortBy::asc(field::FILE_NAME),
            page,
            Projection::Full,
        )
        .await
    {
        Ok(page) => (StatusCode::OK, Json(PaginatedResponse::from(page))).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

async fn search_ifiles_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let page = PageRequest::clamped(params.page, params.size, DEFAULT_PAGE_SIZE);
    match state
        .documents
        .search_documents(FILES_COLLECTION, &params.query, page, Projection::Full)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(PaginatedResponse::from(page))).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

async fn add_ifile_handler(
    State(state): State<AppState>,
    JsonBody(fields): JsonBody<Fields>,
) -> Response {
    match state.documents.add_document(FILES_COLLECTION, fields).await {
        Ok(id) => {
            info!(doc_id = %id, "Document added via handler");
            (StatusCode::OK, "Document added successfully").into_response()
        }
        Err(e) => map_application_error_to_response(e),
    }
}

async fn update_ifile_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    JsonBody(updates): JsonBody<Fields>,
) -> Response {
    match state
        .documents
        .update_document(FILES_COLLECTION, &document_id, updates)
        .await
    {
        Ok(true) => (StatusCode::OK, "Document updated successfully").into_response(),
        Ok(false) => not_found(&document_id),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Deleting an unknown id still succeeds.
async fn delete_ifile_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Response {
    match state
        .documents
        .delete_document(FILES_COLLECTION, &document_id)
        .await
    {
        Ok(_) => (StatusCode::OK, "Document deleted successfully").into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

async fn feedback_handler(
    State(state): State<AppState>,
    JsonBody(feedback): JsonBody<Fields>,
) -> Response {
    match state
        .documents
        .add_document(FEEDBACK_COLLECTION, feedback)
        .await
    {
        Ok(id) => (
            StatusCode::OK,
            Json(FeedbackResponse {
                status: "success".to_string(),
                id: id.into(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to save feedback: {}", e);
            map_application_error_to_response(e)
        }
    }
}

// --- Client Log Handlers ---

fn request_context(headers: &HeaderMap, uri: &OriginalUri) -> RequestContext {
    let header_text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    RequestContext {
        user_agent: header_text(header::USER_AGENT.as_str()),
        url: Some(uri.0.to_string()),
        session_id: header_text("x-session-id"),
    }
}

async fn record_log(
    state: AppState,
    level: LogLevel,
    context: RequestContext,
    entry: ClientLog,
) -> Response {
    match state.client_logs.record(entry, level, &context).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(e) => {
            error!("Failed to save client log: {}", e);
            map_application_error_to_response(e)
        }
    }
}

async fn log_error_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    JsonBody(entry): JsonBody<ClientLog>,
) -> Response {
    record_log(state, LogLevel::Error, request_context(&headers, &uri), entry).await
}

async fn log_warn_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    JsonBody(entry): JsonBody<ClientLog>,
) -> Response {
    record_log(state, LogLevel::Warn, request_context(&headers, &uri), entry).await
}

async fn log_info_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    JsonBody(entry): JsonBody<ClientLog>,
) -> Response {
    record_log(state, LogLevel::Info, request_context(&headers, &uri), entry).await
}

async fn log_debug_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    JsonBody(entry): JsonBody<ClientLog>,
) -> Response {
    record_log(state, LogLevel::Debug, request_context(&headers, &uri), entry).await
}

async fn log_batch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: OriginalUri,
    JsonBody(entries): JsonBody<Vec<Value>>,
) -> Response {
    info!(batch_size = entries.len(), "Received batch of client logs");
    let context = request_context(&headers, &uri);
    let response = state.client_logs.record_batch(entries, &context).await;
    (StatusCode::OK, Json(response)).into_response()
}

async fn list_logs_handler(
    State(state): State<AppState>,
    Query(params): Query<LogListParams>,
) -> Response {
    let (page, query) = params.split();
    match state.client_logs.list(&query, page).await {
        Ok(page) => (StatusCode::OK, Json(PaginatedResponse::from(page))).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

async fn log_stats_handler(
    State(state): State<AppState>,
    Query(params): Query<LogListParams>,
) -> Response {
    let (_, query) = params.split();
    match state.client_logs.stats(&query).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

// --- Error Mapping ---

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn not_found(document_id: &str) -> Response {
    error_body(
        StatusCode::NOT_FOUND,
        format!("Document '{}' not found", document_id),
    )
}

fn multipart_error_response(err: MultipartError) -> Response {
    warn!("Rejected multipart upload: {}", err);
    error_body(err.status(), err.body_text())
}

/// Maps ApplicationError to an HTTP status code and a JSON error body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, message) = match err {
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::DomainError(domain_err) => {
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
        e @ ApplicationError::UpstreamFailure { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        e @ ApplicationError::StoreTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, e.to_string()),
        ApplicationError::StoreFailure(msg) => {
            error!("Underlying store error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    error_body(status, message)
}
