//! Model client abstraction.
//!
//! A [`ModelClient`] sends one prompt (plus the artifact) to an LLM backend
//! and returns the raw response text. It never retries: retry policy lives
//! in the orchestrator, which classifies [`ModelError`]s.
//!
//! # Module layout
//!
//! - [`http`]: `HttpModelClient` for Gemini and OpenAI-compatible endpoints
//! - [`fakes`]: `ScriptedModelClient` for tests and offline runs

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

pub mod fakes;
pub mod http;

pub use http::{HttpModelClient, ModelConfig, Provider};

/// A request for one heuristic judgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Heuristic this prompt evaluates.
    pub heuristic_id: String,
    /// System instruction (role, response schema).
    pub system: String,
    /// User message (heuristic and artifact text).
    pub user: String,
    /// Structured-output schema for backends that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

impl Prompt {
    pub fn new(
        heuristic_id: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            heuristic_id: heuristic_id.into(),
            system: system.into(),
            user: user.into(),
            response_schema: None,
        }
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Failure taxonomy of a single model call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("backend returned status {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("rate limited by backend (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend response carried no text")]
    EmptyResponse,
}

/// Contract for an LLM backend.
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    /// Send `prompt` with `artifact` attached; fail with
    /// [`ModelError::Timeout`] once `timeout` elapses.
    async fn query(
        &self,
        prompt: &Prompt,
        artifact: &Artifact,
        timeout: Duration,
    ) -> Result<String, ModelError>;
}
