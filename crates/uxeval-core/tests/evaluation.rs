//! Orchestrator behaviour against a scripted model backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use uxeval_core::model::fakes::{ScriptedModelClient, ScriptedReply};
use uxeval_core::{
    Artifact, ArtifactNormalizer, CancelToken, EvalError, Evaluator, EvaluatorConfig, Heuristic,
    ModelClient, ModelError, Prompt, RawArtifact, ResponseError, RetryPolicy, Ruleset,
    SeverityScale, Verdict,
};

fn markup() -> Arc<Artifact> {
    let artifact = ArtifactNormalizer::default()
        .normalize(&RawArtifact::markup(
            "<form><input name=\"email\"><button>Delete account</button></form>",
        ))
        .expect("markup normalizes");
    Arc::new(artifact)
}

fn two_heuristics() -> Ruleset {
    Ruleset::new(
        "demo",
        "Demo",
        vec![
            Heuristic::new("visibility", "Visibility of system status", "Keep users informed."),
            Heuristic::new("error-prevention", "Error prevention", "Prevent slips."),
        ],
    )
    .expect("valid ruleset")
}

fn config() -> EvaluatorConfig {
    EvaluatorConfig {
        timeout: Duration::from_secs(30),
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        },
        ..EvaluatorConfig::default()
    }
}

fn pass(id: &str) -> ScriptedReply {
    ScriptedReply::text(format!(
        "HEURISTIC: {id}\nVERDICT: pass\nSEVERITY: none\nDESCRIPTION: Meets the heuristic."
    ))
}

fn issue(id: &str, severity: &str) -> ScriptedReply {
    ScriptedReply::text(format!(
        "HEURISTIC: {id}\nVERDICT: issue\nSEVERITY: {severity}\n\
         DESCRIPTION: Destructive action has no confirmation.\nLOCATION: Delete account button"
    ))
}

fn evaluator(client: &Arc<ScriptedModelClient>, config: EvaluatorConfig) -> Evaluator {
    let client: Arc<dyn ModelClient> = client.clone();
    Evaluator::new(client, config).expect("valid evaluator config")
}

#[tokio::test]
async fn scenario_one_high_issue_scores_its_weight() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_reply("visibility", pass("visibility"))
            .with_reply("error-prevention", issue("error-prevention", "high")),
    );
    let report = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect("run completes");

    assert_eq!(report.ruleset_id, "demo");
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[0].heuristic_id, "visibility");
    assert_eq!(report.findings[0].verdict, Verdict::Pass);
    assert_eq!(report.findings[1].heuristic_id, "error-prevention");
    assert_eq!(report.findings[1].severity.as_deref(), Some("high"));
    assert_eq!(
        report.findings[1].location_hint.as_deref(),
        Some("Delete account button")
    );
    assert_eq!(report.overall_score, 3.0);
    assert_eq!(report.severity_counts.get("high"), Some(&1));
    assert_eq!(report.stats.model_calls, 2);
    assert_eq!(client.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_timeouts_are_retried_until_success() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_reply("visibility", ScriptedReply::timeout())
            .with_reply("visibility", ScriptedReply::timeout())
            .with_reply("visibility", pass("visibility"))
            .with_reply("error-prevention", pass("error-prevention")),
    );
    let report = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect("third attempt succeeds");

    assert_eq!(client.calls_for("visibility"), 3);
    assert_eq!(report.findings[0].verdict, Verdict::Pass);
    assert_eq!(report.stats.retries, 2);
    assert_eq!(report.stats.model_calls, 4);
}

#[tokio::test(start_paused = true)]
async fn hanging_backend_times_out_per_call() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_reply("visibility", ScriptedReply::Hang)
            .with_reply("visibility", pass("visibility"))
            .with_reply("error-prevention", pass("error-prevention")),
    );
    let started = tokio::time::Instant::now();
    let report = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect("retry after timeout succeeds");

    assert_eq!(client.calls_for("visibility"), 2);
    assert_eq!(report.stats.retries, 1);
    // One 30s timeout plus one 1s backoff.
    assert!(started.elapsed() >= Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_run_naming_the_heuristic() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_repeat("error-prevention", ScriptedReply::timeout())
            .with_reply("visibility", pass("visibility")),
    );
    let err = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect_err("run fails");

    assert_eq!(client.calls_for("error-prevention"), 4);
    assert_eq!(err.failed_heuristic(), Some("error-prevention"));
    match err {
        EvalError::EvaluationFailed { cause, .. } => {
            assert!(matches!(*cause, EvalError::Timeout { .. }), "{cause}");
        }
        other => panic!("expected EvaluationFailed, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limited_backend_is_retried() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_reply(
                "visibility",
                ScriptedReply::Fail(ModelError::RateLimited {
                    retry_after_ms: 5_000,
                }),
            )
            .with_reply("visibility", pass("visibility"))
            .with_reply("error-prevention", pass("error-prevention")),
    );
    let started = tokio::time::Instant::now();
    evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect("retry after rate limit succeeds");

    assert_eq!(client.calls_for("visibility"), 2);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn malformed_response_is_reprompted_once_in_strict_mode() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_reply("visibility", ScriptedReply::text("Looks fine to me!"))
            .with_reply("visibility", pass("visibility"))
            .with_reply("error-prevention", pass("error-prevention")),
    );
    let report = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect("re-prompt succeeds");

    assert_eq!(client.calls_for("visibility"), 2);
    assert_eq!(report.stats.reprompts, 1);
    let prompts: Vec<Prompt> = client
        .prompts()
        .into_iter()
        .filter(|p| p.heuristic_id == "visibility")
        .collect();
    assert!(!prompts[0].system.contains("could not be parsed"));
    assert!(prompts[1].system.contains("could not be parsed"));
}

#[tokio::test]
async fn persistently_malformed_response_fails_after_one_reprompt() {
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_repeat(
                "error-prevention",
                ScriptedReply::text("VERDICT: issue\nSEVERITY: catastrophic\nDESCRIPTION: Bad."),
            )
            .with_reply("visibility", pass("visibility")),
    );
    let err = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect_err("run fails");

    assert_eq!(client.calls_for("error-prevention"), 2);
    match err {
        EvalError::EvaluationFailed {
            heuristic_id,
            cause,
        } => {
            assert_eq!(heuristic_id, "error-prevention");
            assert!(matches!(
                *cause,
                EvalError::MalformedResponse(ResponseError::UnknownSeverity { .. })
            ));
        }
        other => panic!("expected EvaluationFailed, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn findings_follow_ruleset_order_not_completion_order() {
    // The first heuristic finishes last: one timeout plus a backoff.
    let client = Arc::new(
        ScriptedModelClient::new()
            .with_reply("visibility", ScriptedReply::timeout())
            .with_reply("visibility", issue("visibility", "low"))
            .with_reply("error-prevention", pass("error-prevention")),
    );
    let report = evaluator(&client, config())
        .evaluate(markup(), &two_heuristics(), CancelToken::never())
        .await
        .expect("run completes");

    let ids: Vec<&str> = report
        .findings
        .iter()
        .map(|f| f.heuristic_id.as_str())
        .collect();
    assert_eq!(ids, vec!["visibility", "error-prevention"]);
    assert_eq!(report.overall_score, 1.0);
}

#[tokio::test]
async fn full_catalog_yields_one_finding_per_heuristic() {
    let ruleset = Ruleset::nielsen_10();
    let client = Arc::new(ScriptedModelClient::new().with_fallback(ScriptedReply::text(
        "VERDICT: pass\nSEVERITY: none\nDESCRIPTION: Meets the heuristic.",
    )));
    let report = evaluator(&client, config())
        .evaluate(markup(), &ruleset, CancelToken::never())
        .await
        .expect("run completes");

    assert_eq!(report.findings.len(), ruleset.len());
    for (finding, heuristic) in report.findings.iter().zip(ruleset.list()) {
        assert_eq!(finding.heuristic_id, heuristic.id);
    }
    assert_eq!(report.overall_score, 0.0);
    assert_eq!(report.issue_count(), 0);
}

#[tokio::test]
async fn uncovered_severity_levels_fail_before_any_call() {
    let scale = SeverityScale::new(["minor", "major"]).expect("valid scale");
    let ruleset = Ruleset::new(
        "custom",
        "Custom",
        vec![Heuristic::new("h1", "H1", "First").with_scale(scale)],
    )
    .expect("valid ruleset");
    let client = Arc::new(ScriptedModelClient::new().with_fallback(pass("h1")));
    let err = evaluator(&client, config())
        .evaluate(markup(), &ruleset, CancelToken::never())
        .await
        .expect_err("weights do not cover the scale");

    assert!(matches!(err, EvalError::Configuration(_)));
    assert_eq!(client.total_calls(), 0);
}

// ---------------------------------------------------------------------------
// Concurrency limit
// ---------------------------------------------------------------------------

/// Counts overlapping calls; every call takes 50ms and passes.
#[derive(Default)]
struct GaugeClient {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ModelClient for GaugeClient {
    async fn query(
        &self,
        prompt: &Prompt,
        _artifact: &Artifact,
        _timeout: Duration,
    ) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!(
            "HEURISTIC: {}\nVERDICT: pass\nSEVERITY: none\nDESCRIPTION: ok",
            prompt.heuristic_id
        ))
    }
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_bounds_in_flight_calls() {
    let gauge = Arc::new(GaugeClient::default());
    let client: Arc<dyn ModelClient> = gauge.clone();
    let evaluator = Evaluator::new(
        client,
        EvaluatorConfig {
            concurrency_limit: 3,
            ..config()
        },
    )
    .expect("valid config");

    let report = evaluator
        .evaluate(markup(), &Ruleset::nielsen_10(), CancelToken::never())
        .await
        .expect("run completes");

    assert_eq!(report.findings.len(), 10);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
    assert_eq!(gauge.in_flight.load(Ordering::SeqCst), 0);
}
