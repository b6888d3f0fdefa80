//! OpenAI-compatible HTTP oracle.
//!
//! Talks to any server exposing `/v1/chat/completions` with image input
//! (vLLM, llama.cpp, ollama, hosted APIs). Images travel as base64 PNG data
//! URLs; structured replies use `response_format: json_schema`.

use super::{Oracle, OracleError};
use crate::config::OracleConfig;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
}

/// One piece of a multimodal message
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Inline image
    ImageUrl {
        /// Data URL wrapper
        image_url: ImageUrl,
    },
}

/// Image reference inside a [`ContentPart`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageUrl {
    /// `data:image/png;base64,...`
    pub url: String,
}

impl ContentPart {
    /// Text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// PNG image part
    #[must_use]
    pub fn png(bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{encoded}"),
            },
        }
    }
}

/// Outgoing chat message
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,
    /// Message parts
    pub content: Vec<ContentPart>,
}

/// Chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Structured output request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// Assistant message in a response
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    /// Generated text; some servers send `null`
    #[serde(default)]
    pub content: Option<String>,
}

/// A single completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseChoice {
    /// Generated message
    pub message: ResponseMessage,
    /// Why generation stopped
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Chat completion response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Completion id
    #[serde(default)]
    pub id: String,
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// Choices
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
}

impl ChatResponse {
    /// Non-empty text of the first choice
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Extract a JSON value from model text, tolerating markdown code fences
pub(crate) fn parse_json_reply(text: &str) -> Result<Value, OracleError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        OracleError::Unparseable(format!("{e}: {preview}"))
    })
}

/// HTTP oracle client
#[derive(Debug, Clone)]
pub struct HttpOracle {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpOracle {
    /// Client for `base_url` using `model`
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(120))
    }

    /// Client with a custom request timeout
    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client,
        }
    }

    /// Build from config.
    ///
    /// # Errors
    ///
    /// [`OracleError::NotConfigured`] when no base URL is set.
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(OracleError::NotConfigured)?;
        let mut oracle = Self::with_timeout(
            base_url,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        );
        oracle.api_key = config.api_key.clone();
        Ok(oracle)
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model name
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str, image: Option<&[u8]>, response_format: Option<Value>) -> ChatRequest {
        let mut content = vec![ContentPart::text(prompt)];
        if let Some(bytes) = image {
            content.push(ContentPart::png(bytes));
        }
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: Role::User,
                content,
            }],
            temperature: Some(0.0),
            response_format,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, OracleError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let start = Instant::now();
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| OracleError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "oracle request rejected");
            return Err(OracleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = resp
            .json()
            .await
            .map_err(|e| OracleError::Http(e.to_string()))?;
        debug!(
            model = %response.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "oracle response received"
        );
        response
            .first_text()
            .map(str::to_string)
            .ok_or(OracleError::EmptyResponse)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate_json(
        &self,
        schema: &Value,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> Result<Value, OracleError> {
        let format = json!({
            "type": "json_schema",
            "json_schema": {"name": "response", "schema": schema, "strict": true}
        });
        let request = self.request(prompt, image, Some(format));
        let text = self.send(&request).await?;
        parse_json_reply(&text)
    }

    async fn generate_multimodal(&self, prompt: &str, image: &[u8]) -> Result<String, OracleError> {
        let request = self.request(prompt, Some(image), None);
        self.send(&request).await
    }
}
