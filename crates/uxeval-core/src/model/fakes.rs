//! In-memory model client fakes (testing and offline runs).
//!
//! `ScriptedModelClient` replays canned outcomes per heuristic id and
//! records every call it receives, so retry and cancellation behaviour can
//! be asserted without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ModelClient, ModelError, Prompt};
use crate::artifact::Artifact;

/// One scripted outcome of a model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Respond with this text.
    Text(String),
    /// Fail with this error.
    Fail(ModelError),
    /// Never answer; the call times out after the requested timeout.
    Hang,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn timeout() -> Self {
        Self::Fail(ModelError::Timeout { timeout_ms: 0 })
    }
}

/// Model client that replays scripted replies keyed by heuristic id.
///
/// Replies queued with [`with_reply`](Self::with_reply) are consumed in
/// order; once a heuristic's queue is empty its repeat reply (set by
/// [`with_repeat`](Self::with_repeat)) or the global fallback is used.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    queued: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    repeat: HashMap<String, ScriptedReply>,
    fallback: Option<ScriptedReply>,
    latency: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    prompts: Mutex<Vec<Prompt>>,
    total: AtomicUsize,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `heuristic_id`.
    pub fn with_reply(self, heuristic_id: &str, reply: ScriptedReply) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(heuristic_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used for `heuristic_id` whenever its queue is empty.
    pub fn with_repeat(mut self, heuristic_id: &str, reply: ScriptedReply) -> Self {
        self.repeat.insert(heuristic_id.to_string(), reply);
        self
    }

    /// Reply used for any heuristic without a script.
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls received for `heuristic_id`.
    pub fn calls_for(&self, heuristic_id: &str) -> usize {
        *self.calls.lock().unwrap().get(heuristic_id).unwrap_or(&0)
    }

    /// Number of calls received overall.
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Every prompt received, in arrival order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_reply(&self, heuristic_id: &str) -> ScriptedReply {
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(heuristic_id)
            .and_then(VecDeque::pop_front);
        queued
            .or_else(|| self.repeat.get(heuristic_id).cloned())
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                ScriptedReply::Fail(ModelError::Backend {
                    status: 500,
                    message: format!("no scripted reply for '{heuristic_id}'"),
                })
            })
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn query(
        &self,
        prompt: &Prompt,
        _artifact: &Artifact,
        timeout: Duration,
    ) -> Result<String, ModelError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(prompt.heuristic_id.clone())
            .or_insert(0) += 1;
        self.prompts.lock().unwrap().push(prompt.clone());

        let reply = self.next_reply(&prompt.heuristic_id);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(ModelError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactNormalizer, RawArtifact};

    fn prompt(id: &str) -> Prompt {
        Prompt::new(id, "", "")
    }

    #[tokio::test]
    async fn test_queue_then_repeat_then_fallback() {
        let artifact = ArtifactNormalizer::default()
            .normalize(&RawArtifact::markup("<p>x</p>"))
            .unwrap();
        let client = ScriptedModelClient::new()
            .with_reply("a", ScriptedReply::text("first"))
            .with_repeat("a", ScriptedReply::text("again"))
            .with_fallback(ScriptedReply::text("other"));
        let t = Duration::from_secs(1);

        assert_eq!(client.query(&prompt("a"), &artifact, t).await.unwrap(), "first");
        assert_eq!(client.query(&prompt("a"), &artifact, t).await.unwrap(), "again");
        assert_eq!(client.query(&prompt("b"), &artifact, t).await.unwrap(), "other");
        assert_eq!(client.calls_for("a"), 2);
        assert_eq!(client.total_calls(), 3);
        assert_eq!(client.prompts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_times_out_after_requested_timeout() {
        let artifact = ArtifactNormalizer::default()
            .normalize(&RawArtifact::markup("<p>x</p>"))
            .unwrap();
        let client = ScriptedModelClient::new().with_fallback(ScriptedReply::Hang);
        let err = client
            .query(&prompt("a"), &artifact, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::Timeout { timeout_ms: 250 });
    }
}
