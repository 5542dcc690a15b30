//! Client for an OpenAI-compatible chat-completion endpoint.

use crate::config::ChatApiParams;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("failed to reach chat server: {0}")]
    Network(#[source] reqwest::Error),
    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid API response format: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            CompletionError::Network(_) => {
                "Cannot connect to the chat server. Make sure it's running and accessible."
            }
            _ => "Failed to send message",
        }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Sends `prompt` as a single user turn and returns the reply text.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

// --- HTTP client ---

pub struct ChatCompletionClient {
    client: Client,
    params: ChatApiParams,
}

impl ChatCompletionClient {
    pub fn new(params: ChatApiParams) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .build()
            .map_err(CompletionError::Network)?;
        Ok(Self { client, params })
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionClient {
    #[instrument(skip(self, prompt), fields(model = %self.params.model, endpoint = %self.params.endpoint))]
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = CompletionRequest {
            model: &self.params.model,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            stream: false,
        };

        let mut builder = self.client.post(&self.params.endpoint).json(&request);
        if !self.params.api_key.is_empty() {
            builder = builder.bearer_auth(&self.params.api_key);
        }
        let response = builder.send().await.map_err(CompletionError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "API response error");
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(CompletionError::Network)?;
        debug!(%text, "API response");
        let parsed: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| CompletionError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CompletionError::Malformed("missing choices[0].message.content".to_string()))
    }
}
