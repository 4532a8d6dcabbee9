use application::{ApplicationError, ConversionApi};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, instrument};

const SERVICE: &str = "converter";

/// Client for the file conversion API. Posts the file as multipart field
/// `file` and reads `content` from the JSON reply.
#[derive(Debug, Clone)]
pub struct HttpConversionClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct ConversionReply {
    content: Option<Value>,
}

impl HttpConversionClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ApplicationError> {
        Ok(Self {
            client: super::build_client(SERVICE, timeout)?,
            url: url.to_string(),
        })
    }
}

fn upstream(reason: String) -> ApplicationError {
    error!(service = SERVICE, "{}", reason);
    ApplicationError::UpstreamFailure {
        service: SERVICE,
        reason,
    }
}

/// Text conversion result. Non-string content is kept in its JSON form.
fn content_text(reply: ConversionReply) -> Result<String, ApplicationError> {
    match reply.content {
        Some(Value::String(text)) => Ok(text),
        Some(Value::Null) | None => Err(upstream(
            "Conversion reply has no content".to_string(),
        )),
        Some(other) => Ok(other.to_string()),
    }
}

#[async_trait]
impl ConversionApi for HttpConversionClient {
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn convert(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ApplicationError> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| upstream(format!("Failed to call converter: {}", e)))?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!("Converter returned {}: {}", status, body)));
        }

        let reply: ConversionReply = response
            .json()
            .await
            .map_err(|e| upstream(format!("Failed to parse converter reply: {}", e)))?;
        let text = content_text(reply)?;
        debug!(chars = text.chars().count(), "File converted");
        Ok(text)
    }
}
