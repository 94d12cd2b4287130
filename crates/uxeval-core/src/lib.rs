//! uxeval core library
//!
//! Heuristic usability evaluation of UI designs. An artifact (screenshot or
//! markup) is normalized, judged against every heuristic of a ruleset by an
//! LLM backend, and the findings are folded into a scored report.
//! Rulesets can also be extracted from guideline documents, including PDFs
//! collected from arXiv.

pub mod aggregate;
pub mod artifact;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod finding;
pub mod metrics;
pub mod model;
pub mod obs;
pub mod orchestrator;
pub mod papers;
pub mod reporting;
pub mod response;
pub mod retry;
pub mod ruleset;
pub mod telemetry;

pub use aggregate::{
    EvaluationReport, ReportAggregator, RunStats, ScoringMode, ScoringPolicy,
};
pub use artifact::{
    Artifact, ArtifactContent, ArtifactKind, ArtifactMetadata, ArtifactNormalizer, ArtifactRef,
    RawArtifact,
};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EvalError, Result};
pub use extraction::{
    pages_from_pdf, parse_rules, rule_array_schema, split_pages, DocumentPage, HeuristicExtractor,
};
pub use finding::{Finding, Verdict};
pub use metrics::METRICS;
pub use model::{HttpModelClient, ModelClient, ModelConfig, ModelError, Prompt, Provider};
pub use orchestrator::{Evaluator, EvaluatorConfig, HeuristicState, PromptBuilder};
pub use papers::{parse_atom_feed, ArxivClient, Paper};
pub use reporting::{render_report_md, write_report_json, write_report_md};
pub use response::{parse_finding, ResponseError};
pub use retry::RetryPolicy;
pub use ruleset::{
    ExtractedRule, Heuristic, Ruleset, RulesetRegistry, SeverityScale, NIELSEN_10,
};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
