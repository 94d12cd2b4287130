//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working configuration against the built-in `nielsen-10` ruleset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::ScoringPolicy;
use crate::artifact::ArtifactNormalizer;
use crate::error::{EvalError, Result};
use crate::model::ModelConfig;
use crate::orchestrator::EvaluatorConfig;
use crate::retry::RetryPolicy;
use crate::ruleset::NIELSEN_10;

/// `[evaluation]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSection {
    pub ruleset_id: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub concurrency_limit: usize,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            ruleset_id: NIELSEN_10.to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            concurrency_limit: 4,
        }
    }
}

/// `[artifact]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSection {
    pub max_image_dimension: u32,
    pub max_markup_bytes: usize,
}

impl Default for ArtifactSection {
    fn default() -> Self {
        let normalizer = ArtifactNormalizer::default();
        Self {
            max_image_dimension: normalizer.max_image_dimension,
            max_markup_bytes: normalizer.max_markup_bytes,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub evaluation: EvaluationSection,
    pub scoring: ScoringPolicy,
    pub model: ModelConfig,
    pub artifact: ArtifactSection,
    /// Extra ruleset files loaded next to the built-in catalog.
    pub rulesets: Vec<PathBuf>,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| EvalError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let eval = &self.evaluation;
        if eval.ruleset_id.trim().is_empty() {
            return Err(EvalError::config("evaluation.ruleset_id must not be empty"));
        }
        if eval.timeout_seconds == 0 {
            return Err(EvalError::config("evaluation.timeout_seconds must be > 0"));
        }
        if eval.concurrency_limit == 0 {
            return Err(EvalError::config("evaluation.concurrency_limit must be > 0"));
        }
        if eval.initial_backoff_ms > eval.max_backoff_ms {
            return Err(EvalError::config(
                "evaluation.initial_backoff_ms must not exceed max_backoff_ms",
            ));
        }
        if self.artifact.max_image_dimension == 0 || self.artifact.max_markup_bytes == 0 {
            return Err(EvalError::config("artifact limits must be > 0"));
        }
        if !self.model.temperature.is_finite() || self.model.temperature < 0.0 {
            return Err(EvalError::config("model.temperature must be a non-negative number"));
        }
        self.scoring.validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.evaluation.max_retries,
            initial_backoff: Duration::from_millis(self.evaluation.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.evaluation.max_backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation.timeout_seconds)
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            timeout: self.timeout(),
            retry: self.retry_policy(),
            concurrency_limit: self.evaluation.concurrency_limit,
            scoring: self.scoring.clone(),
        }
    }

    pub fn normalizer(&self) -> ArtifactNormalizer {
        ArtifactNormalizer::new(
            self.artifact.max_image_dimension,
            self.artifact.max_markup_bytes,
        )
    }
}
