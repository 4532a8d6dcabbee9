// Module declarations
pub mod http;
pub mod persistence;
pub mod search;

// Re-export all implementations
pub use http::{HttpConversionClient, HttpTranslationClient, TranslationClientConfig};
pub use persistence::{InMemoryDocumentStore, MongoDocumentStore, TimedDocumentStore};
pub use search::LinearScanIndex;
