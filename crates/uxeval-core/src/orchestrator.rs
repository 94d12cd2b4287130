//! Evaluation orchestrator.
//!
//! Runs one independent task per heuristic, bounded by a semaphore sized
//! to the backend's concurrency budget. Each task drives its heuristic
//! through
//!
//! ```text
//! Pending → Requesting → { Parsing → Done } | { Retrying → Requesting } | Failed
//! ```
//!
//! Results are joined back into ruleset order. A run is all-or-nothing:
//! the first heuristic to fail aborts its siblings and the run returns
//! [`EvalError::EvaluationFailed`]; caller cancellation aborts everything
//! and returns [`EvalError::Cancelled`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::{EvaluationReport, ReportAggregator, RunStats, ScoringPolicy};
use crate::artifact::{Artifact, ArtifactContent};
use crate::cancel::CancelToken;
use crate::error::{EvalError, Result};
use crate::finding::Finding;
use crate::metrics::METRICS;
use crate::model::{ModelClient, Prompt};
use crate::obs::{
    emit_attempt_failed, emit_heuristic_transition, emit_run_cancelled, emit_run_failed,
    emit_run_finished, emit_run_started, run_span,
};
use crate::response::parse_finding;
use crate::retry::{CallBudget, RetryPolicy, RetryingCaller};
use crate::ruleset::{Heuristic, Ruleset};

/// Evaluation state of a single heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeuristicState {
    Pending,
    Requesting,
    Parsing,
    Retrying,
    Done,
    Failed,
}

impl fmt::Display for HeuristicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Requesting => "requesting",
            Self::Parsing => "parsing",
            Self::Retrying => "retrying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Builds per-heuristic prompts carrying the response schema.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(&self, heuristic: &Heuristic, artifact: &Artifact, strict: bool) -> Prompt {
        let levels = heuristic.severity_scale.levels().join(", ");
        let mut system = format!(
            "You are a usability expert. Judge the user-interface design against exactly one \
             usability heuristic and answer in this format, one field per line:\n\
             HEURISTIC: {id}\n\
             VERDICT: pass or issue\n\
             SEVERITY: one of [{levels}] when VERDICT is issue, otherwise none\n\
             DESCRIPTION: one or two sentences explaining the verdict\n\
             LOCATION: where in the design the problem is, or none",
            id = heuristic.id,
        );
        if strict {
            system.push_str(
                "\n\nYour previous answer could not be parsed. Reply with ONLY the five lines \
                 above, no other text, no markdown, and use a SEVERITY value exactly as listed.",
            );
        }

        let subject = match artifact.content() {
            ArtifactContent::Markup(text) => {
                format!("The design is given as markup:\n```html\n{text}\n```")
            }
            ArtifactContent::Image(_) => match artifact.metadata().dimensions {
                Some((w, h)) => format!("The design is attached as a {w}x{h} screenshot."),
                None => "The design is attached as a screenshot.".to_string(),
            },
        };
        let user = format!(
            "Heuristic {id}: {name}\n{description}\n\n{subject}",
            id = heuristic.id,
            name = heuristic.name,
            description = heuristic.description,
        );

        Prompt::new(heuristic.id.clone(), system, user)
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Knobs for one evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Per-call timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Maximum simultaneous model calls.
    pub concurrency_limit: usize,
    pub scoring: ScoringPolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            concurrency_limit: 4,
            scoring: ScoringPolicy::default(),
        }
    }
}

/// What a heuristic task reports back to the run.
struct HeuristicOutcome {
    index: usize,
    heuristic_id: String,
    result: Result<Finding>,
    budget: CallBudget,
    reprompts: u64,
}

/// Drives one artifact through a ruleset.
pub struct Evaluator {
    client: Arc<dyn ModelClient>,
    config: EvaluatorConfig,
    aggregator: ReportAggregator,
    prompts: PromptBuilder,
}

impl Evaluator {
    pub fn new(client: Arc<dyn ModelClient>, config: EvaluatorConfig) -> Result<Self> {
        if config.concurrency_limit == 0 {
            return Err(EvalError::config("concurrency limit must be at least 1"));
        }
        if config.timeout.is_zero() {
            return Err(EvalError::config("timeout must be greater than zero"));
        }
        config.scoring.validate()?;
        let aggregator = ReportAggregator::new(config.scoring.clone());
        Ok(Self {
            client,
            config,
            aggregator,
            prompts: PromptBuilder,
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate `artifact` against every heuristic of `ruleset`.
    pub async fn evaluate(
        &self,
        artifact: Arc<Artifact>,
        ruleset: &Ruleset,
        cancel: CancelToken,
    ) -> Result<EvaluationReport> {
        let run_id = Uuid::new_v4();
        let span = run_span(&run_id.to_string());
        self.run(run_id, artifact, ruleset, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        run_id: Uuid,
        artifact: Arc<Artifact>,
        ruleset: &Ruleset,
        mut cancel: CancelToken,
    ) -> Result<EvaluationReport> {
        let run_key = run_id.to_string();
        self.config.scoring.check_covers(ruleset)?;
        if cancel.is_cancelled() {
            METRICS.inc_runs_cancelled();
            emit_run_cancelled(&run_key, 0);
            return Err(EvalError::Cancelled);
        }

        let started = tokio::time::Instant::now();
        let artifact_ref = artifact.artifact_ref();
        emit_run_started(&run_key, ruleset.id(), ruleset.len(), artifact_ref.short());

        let caller = RetryingCaller::new(
            Arc::clone(&self.client),
            self.config.retry,
            self.config.timeout,
            run_key.clone(),
        );
        let sem = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let (tx, mut rx) = mpsc::unbounded_channel::<HeuristicOutcome>();

        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(ruleset.len());
        for (index, heuristic) in ruleset.list().iter().cloned().enumerate() {
            emit_heuristic_transition(&run_key, &heuristic.id, HeuristicState::Pending, 0);
            let caller = caller.clone();
            let artifact = Arc::clone(&artifact);
            let prompts = self.prompts.clone();
            let cancel = cancel.clone();
            let sem = Arc::clone(&sem);
            let tx = tx.clone();

            let task = tokio::spawn(
                async move {
                    // Semaphore enforces the concurrency limit
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return;
                    };
                    let outcome =
                        evaluate_heuristic(index, heuristic, &artifact, &caller, &prompts, cancel)
                            .await;
                    let _ = tx.send(outcome);
                }
                .in_current_span(),
            );
            tasks.push(task);
        }
        drop(tx);

        let mut slots: Vec<Option<Finding>> = vec![None; ruleset.len()];
        let mut stats = RunStats::default();
        let mut outstanding = ruleset.len();

        while outstanding > 0 {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abort_all(&tasks);
                    METRICS.inc_runs_cancelled();
                    emit_run_cancelled(&run_key, outstanding);
                    return Err(EvalError::Cancelled);
                }
                outcome = rx.recv() => outcome,
            };
            let Some(outcome) = outcome else {
                break;
            };
            outstanding -= 1;
            stats.model_calls += outcome.budget.calls;
            stats.retries += u64::from(outcome.budget.retries);
            stats.reprompts += outcome.reprompts;

            match outcome.result {
                Ok(finding) => slots[outcome.index] = Some(finding),
                Err(EvalError::Cancelled) => {
                    abort_all(&tasks);
                    METRICS.inc_runs_cancelled();
                    emit_run_cancelled(&run_key, outstanding);
                    return Err(EvalError::Cancelled);
                }
                Err(cause) => {
                    abort_all(&tasks);
                    METRICS.inc_runs_failed();
                    emit_run_failed(&run_key, Some(&outcome.heuristic_id), &cause);
                    return Err(EvalError::EvaluationFailed {
                        heuristic_id: outcome.heuristic_id,
                        cause: Box::new(cause),
                    });
                }
            }
        }

        // Reorder on join: slot i belongs to heuristic i of the ruleset.
        let mut findings = Vec::with_capacity(slots.len());
        for (heuristic, slot) in ruleset.list().iter().zip(slots) {
            match slot {
                Some(finding) => findings.push(finding),
                None => {
                    let cause = EvalError::Backend("heuristic task ended without a result".to_string());
                    METRICS.inc_runs_failed();
                    emit_run_failed(&run_key, Some(&heuristic.id), &cause);
                    return Err(EvalError::EvaluationFailed {
                        heuristic_id: heuristic.id.clone(),
                        cause: Box::new(cause),
                    });
                }
            }
        }

        let mut report =
            self.aggregator
                .aggregate_at(run_id, artifact_ref, ruleset, findings, Utc::now())?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        report.stats = stats;

        METRICS.inc_runs_completed();
        emit_run_finished(
            &run_key,
            report.stats.duration_ms,
            report.stats.model_calls,
            report.overall_score,
        );
        Ok(report)
    }
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

/// Evaluate one heuristic: request, parse, re-prompt once on a malformed
/// response, retry transient failures within the shared budget.
async fn evaluate_heuristic(
    index: usize,
    heuristic: Heuristic,
    artifact: &Artifact,
    caller: &RetryingCaller,
    prompts: &PromptBuilder,
    mut cancel: CancelToken,
) -> HeuristicOutcome {
    let run_id = caller.run_id().to_string();
    let mut budget = CallBudget::default();
    let mut reprompts = 0u64;
    let mut strict = false;

    let result = loop {
        let prompt = prompts.build(&heuristic, artifact, strict);
        let text = match caller
            .call(&heuristic.id, &prompt, artifact, &mut budget, &mut cancel)
            .await
        {
            Ok(text) => text,
            Err(err) => break Err(err),
        };

        let attempt = budget.calls as u32;
        emit_heuristic_transition(&run_id, &heuristic.id, HeuristicState::Parsing, attempt);
        match parse_finding(&heuristic, &text) {
            Ok(finding) => break Ok(finding),
            Err(parse_err) => {
                emit_attempt_failed(&run_id, &heuristic.id, attempt, &parse_err);
                if strict {
                    break Err(EvalError::MalformedResponse(parse_err));
                }
                strict = true;
                reprompts += 1;
                METRICS.inc_reprompts();
                emit_heuristic_transition(&run_id, &heuristic.id, HeuristicState::Retrying, attempt);
            }
        }
    };

    let final_state = match &result {
        Ok(_) => HeuristicState::Done,
        Err(_) => HeuristicState::Failed,
    };
    emit_heuristic_transition(&run_id, &heuristic.id, final_state, budget.calls as u32);

    HeuristicOutcome {
        index,
        heuristic_id: heuristic.id,
        result,
        budget,
        reprompts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactNormalizer, RawArtifact};
    use crate::model::fakes::ScriptedModelClient;

    fn artifact() -> Artifact {
        ArtifactNormalizer::default()
            .normalize(&RawArtifact::markup("<form><button></button></form>"))
            .unwrap()
    }

    #[test]
    fn test_prompt_embeds_heuristic_scale_and_markup() {
        let heuristic = Heuristic::new("error-prevention", "Error prevention", "Prevent slips.");
        let prompt = PromptBuilder.build(&heuristic, &artifact(), false);
        assert_eq!(prompt.heuristic_id, "error-prevention");
        assert!(prompt.system.contains("low, medium, high, critical"));
        assert!(prompt.system.contains("HEURISTIC: error-prevention"));
        assert!(prompt.user.contains("Prevent slips."));
        assert!(prompt.user.contains("<button></button>"));
        assert!(!prompt.system.contains("could not be parsed"));
    }

    #[test]
    fn test_strict_prompt_adds_instruction() {
        let heuristic = Heuristic::new("h", "H", "d");
        let prompt = PromptBuilder.build(&heuristic, &artifact(), true);
        assert!(prompt.system.contains("could not be parsed"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new());
        let zero_concurrency = EvaluatorConfig {
            concurrency_limit: 0,
            ..EvaluatorConfig::default()
        };
        assert!(Evaluator::new(Arc::clone(&client), zero_concurrency).is_err());

        let zero_timeout = EvaluatorConfig {
            timeout: Duration::ZERO,
            ..EvaluatorConfig::default()
        };
        assert!(Evaluator::new(client, zero_timeout).is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(HeuristicState::Retrying.to_string(), "retrying");
        assert_eq!(HeuristicState::Done.to_string(), "done");
    }
}
