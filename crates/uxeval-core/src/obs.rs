//! Structured observability hooks for the evaluation run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for key lifecycle events: run start, per-heuristic
//!   state transitions, failed attempts, and the three terminal outcomes
//!
//! Events are emitted at `info!` level except transitions (`debug!`) and
//! failures (`warn!`).

use tracing::{debug, info, warn};

use crate::orchestrator::HeuristicState;

/// Run-scoped span; every event emitted inside carries `run_id`.
///
/// Attach it with [`tracing::Instrument`] so it survives across awaits.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("uxeval.run", run_id = %run_id)
}

/// Emit event: run started against a ruleset.
pub fn emit_run_started(run_id: &str, ruleset_id: &str, heuristics: usize, artifact: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        ruleset_id = %ruleset_id,
        heuristics = heuristics,
        artifact = %artifact,
    );
}

/// Emit event: a heuristic moved to a new evaluation state.
pub fn emit_heuristic_transition(run_id: &str, heuristic_id: &str, state: HeuristicState, attempt: u32) {
    debug!(
        event = "heuristic.transition",
        run_id = %run_id,
        heuristic_id = %heuristic_id,
        state = %state,
        attempt = attempt,
    );
}

/// Emit event: a model call attempt failed (it may still be retried).
pub fn emit_attempt_failed(run_id: &str, heuristic_id: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "heuristic.attempt_failed",
        run_id = %run_id,
        heuristic_id = %heuristic_id,
        attempt = attempt,
        error = %error,
    );
}

/// Emit event: run finished with every heuristic done.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, model_calls: u64, overall_score: f64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        model_calls = model_calls,
        overall_score = overall_score,
    );
}

/// Emit event: run terminated as failed.
pub fn emit_run_failed(run_id: &str, heuristic_id: Option<&str>, error: &dyn std::fmt::Display) {
    warn!(
        event = "run.failed",
        run_id = %run_id,
        heuristic_id = heuristic_id.unwrap_or("-"),
        error = %error,
    );
}

/// Emit event: run cancelled by the caller.
pub fn emit_run_cancelled(run_id: &str, outstanding: usize) {
    info!(event = "run.cancelled", run_id = %run_id, outstanding = outstanding);
}
