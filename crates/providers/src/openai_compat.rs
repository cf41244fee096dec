//! OpenAI-compatible completion client.
//!
//! Posts the assembled message list to a `/v1/chat/completions`-style
//! endpoint and pulls the reply text out of whichever shape the upstream
//! answers with: a top-level `output` or `reply` field, or the usual
//! `choices[0].message.content`.

use async_trait::async_trait;
use chatrelay_config::UpstreamConfig;
use chatrelay_core::completion::CompletionClient;
use chatrelay_core::error::CompletionError;
use chatrelay_core::generation::GenerationParams;
use chatrelay_core::message::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Characters of an error body kept for diagnostics.
const PREVIEW_CHARS: usize = 400;

/// A client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatClient {
    name: String,
    /// Full endpoint URL; `None` when no base URL is configured
    url: Option<String>,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a client for the full endpoint URL `url`.
    pub fn new(
        url: Option<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CompletionError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "openai_compat".into(),
            url,
            api_key: api_key.into(),
            client,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, CompletionError> {
        Self::new(
            config.chat_url(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Build the wire request for a message list.
    fn to_api_request<'a>(messages: &'a [Message], params: &'a GenerationParams) -> ApiRequest<'a> {
        let min_tokens = (params.min_tokens > 0).then_some(params.min_tokens);
        ApiRequest {
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            repetition_penalty: (params.repetition_penalty != 1.0)
                .then_some(params.repetition_penalty),
            model: (!params.model.is_empty()).then_some(params.model.as_str()),
            top_p: params.top_p,
            top_k: (params.top_k > 0).then_some(params.top_k),
            min_tokens,
            min_length: min_tokens,
            stop: (!params.stop.is_empty()).then_some(params.stop.as_slice()),
        }
    }

    /// Extract the reply text from a decoded response body.
    fn extract_reply(body: ApiResponse) -> Option<String> {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        non_empty(body.output)
            .or_else(|| non_empty(body.reply))
            .or_else(|| {
                body.choices
                    .into_iter()
                    .next()
                    .and_then(|c| non_empty(c.message.content))
            })
    }
}

fn preview(body: &str) -> String {
    if body.is_empty() {
        return "no-body".into();
    }
    body.chars().take(PREVIEW_CHARS).collect()
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.url.is_some() && !self.api_key.is_empty()
    }

    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, CompletionError> {
        let Some(url) = self.url.as_deref().filter(|_| !self.api_key.is_empty()) else {
            return Err(CompletionError::NotConfigured(
                "upstream URL or API key missing".into(),
            ));
        };

        let body = Self::to_api_request(messages, params);
        debug!(client = %self.name, messages = messages.len(), "Sending completion request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("X-API-Key", &self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(e.to_string())
                } else {
                    CompletionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"));
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(e.to_string())
            } else {
                CompletionError::Network(e.to_string())
            }
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Upstream returned error");
            return Err(CompletionError::Status {
                status_code: status.as_u16(),
                preview: preview(&text),
            });
        }

        if !is_json {
            return Err(CompletionError::MalformedBody(format!(
                "expected JSON, got: {}",
                preview(&text)
            )));
        }

        let api_response: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| CompletionError::MalformedBody(format!("Failed to parse response: {e}")))?;

        Self::extract_reply(api_response).ok_or(CompletionError::EmptyBody)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    message: ApiChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
