//! Report aggregation and scoring.
//!
//! Merges per-heuristic [`Finding`]s into an [`EvaluationReport`]. The
//! overall score is a pure function of the findings sequence and the
//! configured [`ScoringPolicy`]; it is never re-derived from the model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactRef;
use crate::error::{EvalError, Result};
use crate::finding::Finding;
use crate::ruleset::{Ruleset, DEFAULT_SEVERITY_LEVELS};

/// How findings are folded into one number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Sum of severity weights over issue findings (0 = no issues).
    #[default]
    WeightedIssueCount,
    /// `100 * (1 - sum / (n * max_weight))`, clamped to [0, 100]
    /// (100 = no issues).
    Normalized,
}

/// Severity → weight mapping plus the folding mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub mode: ScoringMode,
    pub weights: BTreeMap<String, f64>,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        let weights = DEFAULT_SEVERITY_LEVELS
            .iter()
            .zip([1.0, 2.0, 3.0, 5.0])
            .map(|(level, w)| (level.to_string(), w))
            .collect();
        Self {
            mode: ScoringMode::WeightedIssueCount,
            weights,
        }
    }
}

impl ScoringPolicy {
    pub fn new(mode: ScoringMode, weights: BTreeMap<String, f64>) -> Self {
        Self { mode, weights }
    }

    /// Reject empty, negative or non-finite weights.
    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(EvalError::config("scoring weights must not be empty"));
        }
        for (level, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EvalError::config(format!(
                    "scoring weight for '{level}' must be a finite non-negative number"
                )));
            }
        }
        Ok(())
    }

    /// Ensure every severity level the ruleset can produce has a weight.
    pub fn check_covers(&self, ruleset: &Ruleset) -> Result<()> {
        for level in ruleset.severity_levels() {
            if self.weight(level).is_none() {
                return Err(EvalError::config(format!(
                    "no scoring weight for severity '{level}' used by ruleset '{}'",
                    ruleset.id()
                )));
            }
        }
        Ok(())
    }

    pub fn weight(&self, level: &str) -> Option<f64> {
        self.weights
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(level))
            .map(|(_, w)| *w)
    }

    /// Score the findings of one run against `ruleset`.
    ///
    /// In normalized mode the ceiling uses the heaviest level the ruleset
    /// can actually produce, not every configured weight.
    pub fn score(&self, ruleset: &Ruleset, findings: &[Finding]) -> Result<f64> {
        let mut total = 0.0;
        for finding in findings.iter().filter(|f| f.is_issue()) {
            let level = finding.severity.as_deref().unwrap_or_default();
            let weight = self.weight(level).ok_or_else(|| {
                EvalError::config(format!(
                    "no scoring weight for severity '{level}' (heuristic '{}')",
                    finding.heuristic_id
                ))
            })?;
            total += weight;
        }

        match self.mode {
            ScoringMode::WeightedIssueCount => Ok(total),
            ScoringMode::Normalized => {
                let max_weight = ruleset
                    .severity_levels()
                    .into_iter()
                    .filter_map(|level| self.weight(level))
                    .fold(0.0_f64, f64::max);
                if findings.is_empty() || max_weight <= 0.0 {
                    return Ok(100.0);
                }
                let ceiling = findings.len() as f64 * max_weight;
                Ok((100.0 * (1.0 - total / ceiling)).clamp(0.0, 100.0))
            }
        }
    }
}

/// Counters describing how a run reached its findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub model_calls: u64,
    pub retries: u64,
    pub reprompts: u64,
    pub duration_ms: u64,
}

/// The aggregated result of one evaluation run.
///
/// # Invariants
///
/// `findings` holds exactly one entry per heuristic of `ruleset_id`, in
/// ruleset order, and `overall_score` is derived from `findings` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub run_id: Uuid,
    pub artifact: ArtifactRef,
    pub ruleset_id: String,
    pub findings: Vec<Finding>,
    pub overall_score: f64,
    pub scoring_mode: ScoringMode,
    /// Issue count per severity level.
    pub severity_counts: BTreeMap<String, usize>,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: RunStats,
}

impl EvaluationReport {
    pub fn issues(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_issue())
    }

    pub fn issue_count(&self) -> usize {
        self.issues().count()
    }

    pub fn finding(&self, heuristic_id: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.heuristic_id == heuristic_id)
    }
}

/// Builds reports from findings under a fixed scoring policy.
#[derive(Debug, Clone, Default)]
pub struct ReportAggregator {
    policy: ScoringPolicy,
}

impl ReportAggregator {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Aggregate with a fresh run id and the current time.
    pub fn aggregate(
        &self,
        artifact: ArtifactRef,
        ruleset: &Ruleset,
        findings: Vec<Finding>,
    ) -> Result<EvaluationReport> {
        self.aggregate_at(Uuid::new_v4(), artifact, ruleset, findings, Utc::now())
    }

    /// Aggregate with explicit run id and timestamp.
    pub fn aggregate_at(
        &self,
        run_id: Uuid,
        artifact: ArtifactRef,
        ruleset: &Ruleset,
        findings: Vec<Finding>,
        generated_at: DateTime<Utc>,
    ) -> Result<EvaluationReport> {
        check_alignment(ruleset, &findings)?;
        let overall_score = self.policy.score(ruleset, &findings)?;

        let mut severity_counts = BTreeMap::new();
        for finding in findings.iter().filter(|f| f.is_issue()) {
            if let Some(level) = &finding.severity {
                *severity_counts.entry(level.clone()).or_insert(0) += 1;
            }
        }

        Ok(EvaluationReport {
            run_id,
            artifact,
            ruleset_id: ruleset.id().to_string(),
            findings,
            overall_score,
            scoring_mode: self.policy.mode,
            severity_counts,
            generated_at,
            stats: RunStats::default(),
        })
    }
}

fn check_alignment(ruleset: &Ruleset, findings: &[Finding]) -> Result<()> {
    if findings.len() != ruleset.len() {
        return Err(EvalError::InconsistentFindings(format!(
            "expected {} findings for ruleset '{}', got {}",
            ruleset.len(),
            ruleset.id(),
            findings.len()
        )));
    }
    for (heuristic, finding) in ruleset.list().iter().zip(findings) {
        if heuristic.id != finding.heuristic_id {
            return Err(EvalError::InconsistentFindings(format!(
                "expected finding for '{}', got '{}'",
                heuristic.id, finding.heuristic_id
            )));
        }
    }
    Ok(())
}
