//! Retry policy and the retrying call loop shared by evaluation and
//! extraction.
//!
//! The model client never retries; this layer decides which failures are
//! transient, how long to back off, and when the budget is spent.

use std::sync::Arc;
use std::time::Duration;

use crate::artifact::Artifact;
use crate::cancel::CancelToken;
use crate::error::EvalError;
use crate::metrics::METRICS;
use crate::model::{ModelClient, ModelError, Prompt};
use crate::obs::{emit_attempt_failed, emit_heuristic_transition};
use crate::orchestrator::HeuristicState;

/// Bounded exponential backoff for transient model failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` calls at most.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether `err` may succeed on a later attempt.
    pub fn is_transient(&self, err: &ModelError) -> bool {
        matches!(
            err,
            ModelError::Timeout { .. }
                | ModelError::Backend { .. }
                | ModelError::RateLimited { .. }
                | ModelError::Transport(_)
                | ModelError::EmptyResponse
        )
    }

    /// Backoff before retry number `retry` (0-based): `initial * 2^retry`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Backoff for `err`, honouring a backend rate-limit hint.
    pub fn delay_for(&self, retry: u32, err: &ModelError) -> Duration {
        let base = self.backoff(retry);
        match err {
            ModelError::RateLimited { retry_after_ms } => {
                base.max(Duration::from_millis(*retry_after_ms))
            }
            _ => base,
        }
    }
}

/// Attempt accounting for one subject (heuristic or page).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallBudget {
    pub calls: u64,
    pub retries: u32,
}

/// Issues model calls with timeout, backoff and cancellation.
#[derive(Clone)]
pub struct RetryingCaller {
    client: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    timeout: Duration,
    run_id: String,
}

impl RetryingCaller {
    pub fn new(
        client: Arc<dyn ModelClient>,
        retry: RetryPolicy,
        timeout: Duration,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            timeout,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Query until a response arrives, the budget is spent, or the run is
    /// cancelled. Transient failures count against `budget.retries`,
    /// which is shared across re-prompts of the same subject.
    pub async fn call(
        &self,
        subject: &str,
        prompt: &Prompt,
        artifact: &Artifact,
        budget: &mut CallBudget,
        cancel: &mut CancelToken,
    ) -> Result<String, EvalError> {
        let timeout_ms = self.timeout.as_millis() as u64;
        loop {
            if cancel.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            budget.calls += 1;
            let attempt = budget.calls as u32;
            emit_heuristic_transition(&self.run_id, subject, HeuristicState::Requesting, attempt);
            METRICS.inc_model_calls();

            let request = tokio::time::timeout(
                self.timeout,
                self.client.query(prompt, artifact, self.timeout),
            );
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EvalError::Cancelled),
                response = request => response,
            };

            let err = match response {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) => err,
                Err(_elapsed) => ModelError::Timeout { timeout_ms },
            };
            emit_attempt_failed(&self.run_id, subject, attempt, &err);

            if !self.retry.is_transient(&err) || budget.retries >= self.retry.max_retries {
                return Err(err.into());
            }
            let delay = self.retry.delay_for(budget.retries, &err);
            budget.retries += 1;
            METRICS.inc_retries();
            emit_heuristic_transition(&self.run_id, subject, HeuristicState::Retrying, attempt);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EvalError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
