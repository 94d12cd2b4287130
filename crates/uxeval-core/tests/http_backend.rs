//! `HttpModelClient` against a loopback backend.

mod support;

use std::time::Duration;

use serde_json::json;
use support::{Canned, CannedServer};
use uxeval_core::{
    Artifact, ArtifactNormalizer, HttpModelClient, ModelClient, ModelConfig, ModelError, Prompt,
    Provider, RawArtifact,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn gemini(server: &CannedServer) -> HttpModelClient {
    let config = ModelConfig {
        provider: Provider::Gemini,
        endpoint: Some(server.url.clone()),
        model: "gemini-test".to_string(),
        ..ModelConfig::default()
    };
    HttpModelClient::with_api_key(config, "test-key").expect("client")
}

fn openai(server: &CannedServer, key: &str) -> HttpModelClient {
    let config = ModelConfig {
        provider: Provider::OpenaiCompatible,
        endpoint: Some(format!("{}/v1/", server.url)),
        model: "local-model".to_string(),
        ..ModelConfig::default()
    };
    HttpModelClient::with_api_key(config, key).expect("client")
}

fn prompt() -> Prompt {
    Prompt::new("H1", "judge", "evaluate this")
}

fn markup() -> Artifact {
    ArtifactNormalizer::default()
        .normalize(&RawArtifact::markup("<button>Save</button>"))
        .expect("markup artifact")
}

fn gemini_reply(text: &str) -> Canned {
    Canned::json(
        200,
        &json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] }),
    )
}

#[tokio::test]
async fn gemini_request_carries_key_header_and_returns_text() {
    let server = CannedServer::always(gemini_reply("Verdict: pass")).await;
    let text = gemini(&server)
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .expect("successful call");
    assert_eq!(text, "Verdict: pass");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].request_line(),
        "post /models/gemini-test:generatecontent http/1.1"
    );
    assert_eq!(requests[0].header("x-goog-api-key"), Some("test-key"));
    assert_eq!(requests[0].header("authorization"), None);
    assert_eq!(requests[0].json()["contents"][0]["parts"][0]["text"], "evaluate this");
}

#[tokio::test]
async fn gemini_request_sends_response_schema() {
    let server = CannedServer::always(gemini_reply("[]")).await;
    let schema = json!({ "type": "ARRAY" });
    gemini(&server)
        .query(&prompt().with_response_schema(schema.clone()), &markup(), TIMEOUT)
        .await
        .expect("successful call");

    let body = server.requests()[0].json();
    assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(body["generationConfig"]["responseSchema"], schema);
}

#[tokio::test]
async fn rate_limit_reports_retry_after_in_millis() {
    let server =
        CannedServer::always(Canned::new(429, "slow down").with_header("Retry-After", "7")).await;
    let err = gemini(&server)
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::RateLimited { retry_after_ms: 7_000 });
}

#[tokio::test]
async fn rate_limit_without_retry_after_defaults_to_one_second() {
    let server = CannedServer::always(Canned::new(429, "")).await;
    let err = gemini(&server)
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::RateLimited { retry_after_ms: 1_000 });
}

#[tokio::test]
async fn huge_retry_after_saturates() {
    let server = CannedServer::always(
        Canned::new(429, "").with_header("Retry-After", &u64::MAX.to_string()),
    )
    .await;
    let err = gemini(&server)
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::RateLimited { retry_after_ms: u64::MAX });
}

#[tokio::test]
async fn server_error_is_backend_with_truncated_body() {
    let server = CannedServer::always(Canned::new(503, "x".repeat(500))).await;
    let err = gemini(&server)
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .unwrap_err();
    match err {
        ModelError::Backend { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message.chars().count(), 201);
            assert!(message.ends_with('…'));
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server =
        CannedServer::always(gemini_reply("late").delayed(Duration::from_secs(3))).await;
    let err = gemini(&server)
        .query(&prompt(), &markup(), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert_eq!(err, ModelError::Timeout { timeout_ms: 200 });
}

#[tokio::test]
async fn reply_without_text_is_empty_response() {
    let server = CannedServer::start(|request| {
        if request.json()["contents"][0]["parts"][0]["text"] == "blank" {
            gemini_reply("   ")
        } else {
            Canned::json(200, &json!({ "candidates": [] }))
        }
    })
    .await;
    let client = gemini(&server);

    let err = client.query(&prompt(), &markup(), TIMEOUT).await.unwrap_err();
    assert_eq!(err, ModelError::EmptyResponse);

    let blank = Prompt::new("H1", "judge", "blank");
    let err = client.query(&blank, &markup(), TIMEOUT).await.unwrap_err();
    assert_eq!(err, ModelError::EmptyResponse);
}

#[tokio::test]
async fn openai_compatible_uses_bearer_only_with_key() {
    let reply = Canned::json(
        200,
        &json!({ "choices": [{ "message": { "content": "Verdict: issue" } }] }),
    );
    let server = CannedServer::always(reply).await;

    let text = openai(&server, "sk-local")
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .expect("keyed call");
    assert_eq!(text, "Verdict: issue");
    openai(&server, "")
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .expect("keyless call");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].request_line(), "post /v1/chat/completions http/1.1");
    assert_eq!(requests[0].header("authorization"), Some("bearer sk-local"));
    assert_eq!(requests[0].json()["model"], "local-model");
    assert_eq!(requests[1].header("authorization"), None);
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let config = ModelConfig {
        endpoint: Some(format!("http://{addr}")),
        ..ModelConfig::default()
    };
    let err = HttpModelClient::with_api_key(config, "test-key")
        .expect("client")
        .query(&prompt(), &markup(), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Transport(_)), "got {err:?}");
}
