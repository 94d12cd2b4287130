//! Caller cancellation of in-flight runs.

use std::sync::Arc;
use std::time::Duration;

use uxeval_core::model::fakes::{ScriptedModelClient, ScriptedReply};
use uxeval_core::{
    cancel_pair, ArtifactNormalizer, EvalError, Evaluator, EvaluatorConfig, ModelClient,
    RawArtifact, Ruleset,
};

fn setup(client: &Arc<ScriptedModelClient>) -> (Arc<Evaluator>, Arc<uxeval_core::Artifact>) {
    let dyn_client: Arc<dyn ModelClient> = client.clone();
    let evaluator = Evaluator::new(dyn_client, EvaluatorConfig::default()).expect("valid config");
    let artifact = ArtifactNormalizer::default()
        .normalize(&RawArtifact::markup("<main><h1>Checkout</h1></main>"))
        .expect("markup normalizes");
    (Arc::new(evaluator), Arc::new(artifact))
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_hanging_run_stops_all_calls() {
    let client = Arc::new(ScriptedModelClient::new().with_fallback(ScriptedReply::Hang));
    let (evaluator, artifact) = setup(&client);
    let (handle, token) = cancel_pair();

    let run = tokio::spawn({
        let evaluator = Arc::clone(&evaluator);
        async move {
            evaluator
                .evaluate(artifact, &Ruleset::nielsen_10(), token)
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    // Concurrency limit 4: four calls are hanging, six are queued.
    assert_eq!(client.total_calls(), 4);
    handle.cancel();

    let err = run.await.expect("task joins").expect_err("run is cancelled");
    assert!(matches!(err, EvalError::Cancelled));
    assert!(err.is_cancelled());

    let calls_at_cancel = client.total_calls();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(client.total_calls(), calls_at_cancel);
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_backoff_issues_no_further_calls() {
    let client = Arc::new(ScriptedModelClient::new().with_fallback(ScriptedReply::timeout()));
    let (evaluator, artifact) = setup(&client);
    let (handle, token) = cancel_pair();

    let run = tokio::spawn({
        let evaluator = Arc::clone(&evaluator);
        async move {
            evaluator
                .evaluate(artifact, &Ruleset::nielsen_10(), token)
                .await
        }
    });

    // Every first attempt fails at t=0 and sleeps 1s before retrying.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let before = client.total_calls();
    handle.cancel();

    let err = run.await.expect("task joins").expect_err("run is cancelled");
    assert!(matches!(err, EvalError::Cancelled));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(client.total_calls(), before);
}

#[tokio::test]
async fn cancelled_before_start_makes_no_calls() {
    let client = Arc::new(
        ScriptedModelClient::new().with_fallback(ScriptedReply::text(
            "VERDICT: pass\nSEVERITY: none\nDESCRIPTION: ok",
        )),
    );
    let (evaluator, artifact) = setup(&client);
    let (handle, token) = cancel_pair();
    handle.cancel();

    let err = evaluator
        .evaluate(artifact, &Ruleset::nielsen_10(), token)
        .await
        .expect_err("run is cancelled");
    assert!(matches!(err, EvalError::Cancelled));
    assert_eq!(client.total_calls(), 0);
}
