//! OpenRouter-compatible chat completions backend.
//!
//! Talks to any endpoint exposing `POST {base}/chat/completions` in the
//! OpenRouter dialect (Kilocode's gateway by default). The key is first sent
//! as a raw `Authorization` value; a 401 triggers one retry with a `Bearer`
//! prefix.

use crate::backend::{LlmBackend, LlmRequest, LlmResponse, MessageRole, TokenUsage};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Configuration for the OpenRouter-compatible backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpenRouterConfig {
    /// Base URL; trailing slashes are ignored.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key. Generation fails with `InvalidConfig` while unset.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Optional `HTTP-Referer` attribution header.
    #[serde(default)]
    pub referer: Option<String>,
    /// Optional `X-Title` attribution header.
    #[serde(default = "default_title")]
    pub title: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://kilocode.ai/api/openrouter".to_string()
}

fn default_model() -> String {
    "openai/gpt-4.1".to_string()
}

fn default_title() -> Option<String> {
    Some("Kanna Akizuki Bot".to_string())
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            referer: None,
            title: default_title(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl OpenRouterConfig {
    /// Returns the chat completions endpoint.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStyle {
    Raw,
    Bearer,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, request: &'a LlmRequest) -> Self {
        Self {
            model,
            messages: request
                .messages
                .iter()
                .map(|message| WireMessage {
                    role: message.role,
                    content: vec![WirePart::Text {
                        text: &message.content,
                    }],
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: MessageRole,
    content: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseContent {
    Text(String),
    Parts(Vec<ResponsePart>),
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatResponse {
    /// Extracts the first choice's text, trimmed.
    fn into_text(self) -> String {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content);

        match content {
            Some(ResponseContent::Text(text)) => text.trim().to_string(),
            Some(ResponseContent::Parts(parts)) => parts
                .into_iter()
                .filter(|part| part.kind.as_deref() == Some("text"))
                .filter_map(|part| part.text)
                .collect::<String>()
                .trim()
                .to_string(),
            Some(ResponseContent::Other(_)) | None => String::new(),
        }
    }
}

/// Chat completions client for OpenRouter-compatible gateways.
#[derive(Debug, Clone)]
pub struct OpenRouterBackend {
    client: Client,
    config: OpenRouterConfig,
    url: String,
}

impl OpenRouterBackend {
    /// Creates a backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidConfig` if the HTTP client cannot be built.
    pub fn new(config: OpenRouterConfig) -> Result<Self, Report<LlmError>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;
        let url = config.completions_url();
        Ok(Self {
            client,
            config,
            url,
        })
    }

    /// Returns the backend configuration.
    #[must_use]
    pub fn config(&self) -> &OpenRouterConfig {
        &self.config
    }

    fn headers(&self, api_key: &str, style: AuthStyle) -> Result<HeaderMap, Report<LlmError>> {
        let invalid = |name: &str| LlmError::InvalidConfig {
            reason: format!("{name} is not a valid header value"),
        };

        let authorization = match style {
            AuthStyle::Raw => api_key.to_string(),
            AuthStyle::Bearer => format!("Bearer {api_key}"),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization).map_err(|_| invalid("api key"))?,
        );
        if let Some(referer) = &self.config.referer {
            headers.insert(
                "http-referer",
                HeaderValue::from_str(referer).map_err(|_| invalid("referer"))?,
            );
        }
        if let Some(title) = &self.config.title {
            headers.insert(
                "x-title",
                HeaderValue::from_str(title).map_err(|_| invalid("title"))?,
            );
        }
        Ok(headers)
    }

    async fn send(
        &self,
        body: &ChatRequest<'_>,
        api_key: &str,
        style: AuthStyle,
    ) -> Result<reqwest::Response, Report<LlmError>> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers(api_key, style)?)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::RequestFailed {
                        reason: e.to_string(),
                    }
                }
            })?;
        Ok(response)
    }
}

async fn body_text(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string())
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl LlmBackend for OpenRouterBackend {
    #[instrument(skip_all, fields(model = %self.config.model, messages = request.messages.len()))]
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, Report<LlmError>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LlmError::InvalidConfig {
                reason: "missing API key".to_string(),
            })?;

        let body = ChatRequest::new(&self.config.model, request);

        let mut response = self.send(&body, api_key, AuthStyle::Raw).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("raw authorization rejected, retrying with bearer token");
            response = self.send(&body, api_key, AuthStyle::Bearer).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = body_text(response).await;
            let err = match status {
                StatusCode::UNAUTHORIZED => LlmError::Unauthorized { body },
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                    retry_after_secs: retry_after,
                },
                _ => LlmError::ApiError {
                    status: status.as_u16(),
                    body,
                },
            };
            return Err(err.into());
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::ResponseParseFailed {
                    reason: e.to_string(),
                })?;

        let usage = parsed
            .usage
            .as_ref()
            .map(|usage| TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })
            .unwrap_or_default();
        let model = parsed
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        let content = parsed.into_text();

        debug!(tokens = usage.total(), chars = content.len(), "generation complete");
        Ok(LlmResponse {
            content,
            usage,
            model,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
