pub mod conversion_client;
pub mod translation_client;

pub use conversion_client::HttpConversionClient;
pub use translation_client::{HttpTranslationClient, TranslationClientConfig};

use application::ApplicationError;
use std::time::Duration;

fn build_client(service: &'static str, timeout: Duration) -> Result<reqwest::Client, ApplicationError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ApplicationError::UpstreamFailure {
            service,
            reason: format!("Failed to build HTTP client: {}", e),
        })
}
