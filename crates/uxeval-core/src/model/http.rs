//! HTTP model client.
//!
//! Speaks two wire formats: Gemini `generateContent` and OpenAI-compatible
//! `chat/completions`. Images travel inline as base64 PNG. Sampling
//! temperature defaults to zero.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ModelClient, ModelError, Prompt};
use crate::artifact::Artifact;
use crate::error::{EvalError, Result};

const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
const ERROR_BODY_LIMIT: usize = 200;
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Wire format of the configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gemini,
    OpenaiCompatible,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    /// Base URL; provider default when unset.
    pub endpoint: Option<String>,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            endpoint: None,
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn endpoint(&self) -> &str {
        match (&self.endpoint, self.provider) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, Provider::Gemini) => DEFAULT_GEMINI_ENDPOINT,
            (None, Provider::OpenaiCompatible) => DEFAULT_OPENAI_ENDPOINT,
        }
    }
}

/// [`ModelClient`] backed by `reqwest`.
pub struct HttpModelClient {
    config: ModelConfig,
    api_key: String,
    http: reqwest::Client,
}

impl HttpModelClient {
    /// Build a client, reading the API key from `config.api_key_env`.
    ///
    /// Gemini requires a key; OpenAI-compatible endpoints (often local)
    /// may run without one.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() && config.provider == Provider::Gemini {
            return Err(EvalError::config(format!(
                "no API key found in ${}",
                config.api_key_env
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("uxeval/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EvalError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            api_key,
            http,
        })
    }

    fn request(&self, prompt: &Prompt, artifact: &Artifact) -> reqwest::RequestBuilder {
        let endpoint = self.config.endpoint();
        match self.config.provider {
            Provider::Gemini => self
                .http
                .post(format!(
                    "{endpoint}/models/{}:generateContent",
                    self.config.model
                ))
                .header("x-goog-api-key", &self.api_key)
                .json(&gemini_body(prompt, artifact, self.config.temperature)),
            Provider::OpenaiCompatible => {
                let builder = self
                    .http
                    .post(format!("{endpoint}/chat/completions"))
                    .json(&openai_body(
                        prompt,
                        artifact,
                        &self.config.model,
                        self.config.temperature,
                    ));
                if self.api_key.is_empty() {
                    builder
                } else {
                    builder.bearer_auth(&self.api_key)
                }
            }
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn query(
        &self,
        prompt: &Prompt,
        artifact: &Artifact,
        timeout: Duration,
    ) -> std::result::Result<String, ModelError> {
        let timeout_ms = timeout.as_millis() as u64;
        debug!(heuristic_id = %prompt.heuristic_id, provider = ?self.config.provider, "sending model request");

        let response = self
            .request(prompt, artifact)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout_ms))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ModelError::RateLimited {
                retry_after_ms: retry_after_secs.saturating_mul(1000),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(heuristic_id = %prompt.heuristic_id, status = status.as_u16(), "model backend error");
            return Err(ModelError::Backend {
                status: status.as_u16(),
                message: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| transport_error(e, timeout_ms))?;
        let text = match self.config.provider {
            Provider::Gemini => gemini_text(&data),
            Provider::OpenaiCompatible => openai_text(&data),
        };
        text.filter(|t| !t.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

fn transport_error(err: reqwest::Error, timeout_ms: u64) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout { timeout_ms }
    } else {
        ModelError::Transport(err.to_string())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    let mut out: String = text.chars().take(limit).collect();
    if text.chars().count() > limit {
        out.push('…');
    }
    out
}

/// Request body for Gemini `generateContent`.
pub fn gemini_body(prompt: &Prompt, artifact: &Artifact, temperature: f32) -> Value {
    let mut parts = vec![json!({ "text": prompt.user })];
    if let Some(png) = artifact.image_png() {
        parts.push(json!({
            "inline_data": {
                "mime_type": artifact.metadata().mime_type,
                "data": STANDARD.encode(png),
            }
        }));
    }
    let mut generation_config = json!({ "temperature": temperature });
    if let Some(schema) = &prompt.response_schema {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = schema.clone();
    }
    json!({
        "systemInstruction": { "parts": [{ "text": prompt.system }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

/// Request body for OpenAI-compatible `chat/completions`.
pub fn openai_body(prompt: &Prompt, artifact: &Artifact, model: &str, temperature: f32) -> Value {
    let user_content = match artifact.image_png() {
        Some(png) => json!([
            { "type": "text", "text": prompt.user },
            {
                "type": "image_url",
                "image_url": {
                    "url": format!(
                        "data:{};base64,{}",
                        artifact.metadata().mime_type,
                        STANDARD.encode(png)
                    )
                }
            }
        ]),
        None => json!(prompt.user),
    };
    json!({
        "model": model,
        "temperature": temperature,
        "messages": [
            { "role": "system", "content": prompt.system },
            { "role": "user", "content": user_content },
        ],
    })
}

/// Response text from a Gemini payload.
pub fn gemini_text(data: &Value) -> Option<String> {
    data.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Response text from an OpenAI-compatible payload.
pub fn openai_text(data: &Value) -> Option<String> {
    data.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}
