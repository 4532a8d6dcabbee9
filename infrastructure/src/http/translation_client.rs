use application::{ApplicationError, TranslationApi};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

const SERVICE: &str = "translator";

#[derive(Debug, Clone)]
pub struct TranslationClientConfig {
    pub url: String,
    pub model: String,
    /// Target language named in the system prompt.
    pub language: String,
    pub timeout: Duration,
}

/// Client for an OpenAI-compatible chat completion endpoint serving the
/// translation model.
#[derive(Debug, Clone)]
pub struct HttpTranslationClient {
    client: reqwest::Client,
    url: String,
    model: String,
    system_prompt: String,
}

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_completion_tokens: u32,
    temperature: f64,
    use_beam_search: bool,
    top_p: f64,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

impl HttpTranslationClient {
    pub fn new(config: TranslationClientConfig) -> Result<Self, ApplicationError> {
        Ok(Self {
            client: super::build_client(SERVICE, config.timeout)?,
            url: config.url,
            model: config.model,
            system_prompt: format!(
                "You are a helpful assistant that translates English sentences into {}.",
                config.language
            ),
        })
    }

    fn request<'a>(&'a self, text: &str) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Translate: {}", text),
                },
            ],
            max_completion_tokens: 256,
            temperature: 0.6,
            use_beam_search: true,
            top_p: 0.9,
        }
    }
}

fn upstream(reason: String) -> ApplicationError {
    error!(service = SERVICE, "{}", reason);
    ApplicationError::UpstreamFailure {
        service: SERVICE,
        reason,
    }
}

fn first_reply(response: ChatCompletionResponse) -> Result<String, ApplicationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| upstream("Translation reply has no choices".to_string()))
}

#[async_trait]
impl TranslationApi for HttpTranslationClient {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn translate(&self, text: &str) -> Result<String, ApplicationError> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.request(text))
            .send()
            .await
            .map_err(|e| upstream(format!("Failed to call translator: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!("Translator returned {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| upstream(format!("Failed to parse translator reply: {}", e)))?;
        let reply = first_reply(parsed)?;
        debug!(reply = %reply, "Raw translation reply");
        Ok(reply)
    }
}
