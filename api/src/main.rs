// ./api/src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use application::{
    ClientLogService, DocumentService, DocumentStore, FileUploadService, TranslationService,
};
use infrastructure::{
    HttpConversionClient, HttpTranslationClient, InMemoryDocumentStore, LinearScanIndex,
    MongoDocumentStore, TimedDocumentStore, TranslationClientConfig,
};

mod config;
mod routes;

use config::{AppConfig, StoreBackend};
use routes::{AppState, build_router};

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // --- Dependency Injection ---
    // 1. Create infrastructure components
    let backend: Arc<dyn DocumentStore> = match &config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-memory document store.");
            Arc::new(InMemoryDocumentStore::new())
        }
        StoreBackend::MongoDb { url, database } => {
            match MongoDocumentStore::connect(url, database).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Failed to connect to MongoDB: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };
    let store: Arc<dyn DocumentStore> =
        Arc::new(TimedDocumentStore::new(backend, config.store_timeout));
    let index = Arc::new(LinearScanIndex::new(store.clone()));

    let converter = match HttpConversionClient::new(&config.converter_url, config.upstream_timeout) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create conversion client: {}", e);
            std::process::exit(1);
        }
    };
    let translator = match HttpTranslationClient::new(TranslationClientConfig {
        url: config.translator_url.clone(),
        model: config.translator_model.clone(),
        language: config.translation_language.clone(),
        timeout: config.upstream_timeout,
    }) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create translation client: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        converter = %config.converter_url,
        translator = %config.translator_url,
        "Infrastructure components initialized."
    );

    // 2. Create application services, injecting dependencies
    let documents = Arc::new(DocumentService::new(store.clone(), index));
    let app_state = AppState {
        documents: documents.clone(),
        translations: Arc::new(TranslationService::new(
            store.clone(),
            translator,
            &config.translation_language,
        )),
        uploads: Arc::new(FileUploadService::new(store, converter)),
        client_logs: Arc::new(ClientLogService::new(documents)),
    };
    info!("Application services initialized.");

    let app = build_router(app_state, &config);
    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("Server stopped.");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}
