//! Inbound interface: raw bytes in, scored report out.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::aggregate::EvaluationReport;
use crate::artifact::{ArtifactNormalizer, RawArtifact};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::ModelClient;
use crate::orchestrator::{Evaluator, EvaluatorConfig};
use crate::ruleset::RulesetRegistry;

/// Wires normalizer, registry and evaluator together.
pub struct Engine {
    registry: RulesetRegistry,
    normalizer: ArtifactNormalizer,
    evaluator: Evaluator,
    default_ruleset: String,
}

impl Engine {
    pub fn new(
        registry: RulesetRegistry,
        normalizer: ArtifactNormalizer,
        client: Arc<dyn ModelClient>,
        evaluator_config: EvaluatorConfig,
        default_ruleset: impl Into<String>,
    ) -> Result<Self> {
        let default_ruleset = default_ruleset.into();
        // Fail at startup, not on the first request.
        registry.get(&default_ruleset)?;
        Ok(Self {
            registry,
            normalizer,
            evaluator: Evaluator::new(client, evaluator_config)?,
            default_ruleset,
        })
    }

    /// Build from configuration, loading any extra ruleset files.
    pub fn from_config(config: &EngineConfig, client: Arc<dyn ModelClient>) -> Result<Self> {
        config.validate()?;
        let registry = RulesetRegistry::load(&config.rulesets)?;
        Self::new(
            registry,
            config.normalizer(),
            client,
            config.evaluator_config(),
            config.evaluation.ruleset_id.clone(),
        )
    }

    pub fn registry(&self) -> &RulesetRegistry {
        &self.registry
    }

    pub fn default_ruleset(&self) -> &str {
        &self.default_ruleset
    }

    /// Evaluate one artifact.
    ///
    /// The artifact is normalized before anything else, so unsupported
    /// input fails with [`crate::EvalError::UnsupportedArtifact`] without a single
    /// model call.
    #[instrument(skip(self, bytes, cancel), fields(bytes = bytes.len()))]
    pub async fn evaluate(
        &self,
        bytes: &[u8],
        kind: &str,
        ruleset_id: Option<&str>,
        cancel: CancelToken,
    ) -> Result<EvaluationReport> {
        let artifact = self
            .normalizer
            .normalize(&RawArtifact::new(kind, bytes))?;
        let ruleset = self
            .registry
            .get(ruleset_id.unwrap_or(&self.default_ruleset))?;
        info!(
            kind = %artifact.kind(),
            digest = %artifact.artifact_ref().short(),
            ruleset_id = %ruleset.id(),
            "artifact normalized"
        );
        self.evaluator
            .evaluate(Arc::new(artifact), &ruleset, cancel)
            .await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("default_ruleset", &self.default_ruleset)
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}
