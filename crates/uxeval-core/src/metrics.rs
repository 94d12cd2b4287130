//! Global atomic counters for evaluation observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    model_calls: AtomicU64,
    retries: AtomicU64,
    reprompts: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            model_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            reprompts: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
        }
    }

    pub fn inc_model_calls(&self) {
        self.model_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "model_calls", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn inc_reprompts(&self) {
        self.reprompts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reprompts", "counter incremented");
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            model_calls = self.model_calls(),
            retries = self.retries(),
            reprompts = self.reprompts(),
            runs_completed = self.runs_completed(),
            runs_failed = self.runs_failed(),
            runs_cancelled = self.runs_cancelled(),
        );
    }

    pub fn model_calls(&self) -> u64 {
        self.model_calls.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn reprompts(&self) -> u64 {
        self.reprompts.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_cancelled(&self) -> u64 {
        self.runs_cancelled.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.model_calls.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.reprompts.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.runs_cancelled.store(0, Ordering::Relaxed);
    }
}
