//! Testing utilities including mock implementations.
//!
//! These let applications exercise the pipeline without network access or
//! analysis backends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{StageError, StageResult, StoreError, StoreResult, TransportError};
use crate::stores::MemoryStore;
use crate::traits::{
    stage::AnalysisStage,
    store::DocumentStore,
    transport::{Transport, TransportResponse},
};
use crate::types::{
    analysis::{StageInput, StagePayload},
    document::{NormalizedDocument, ReviewRecord, StoredDocument},
};

/// Scripted reply of the mock transport.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(TransportResponse),
    Timeout,
    Connection(String),
}

/// Record of a request made to the mock transport.
#[derive(Debug, Clone)]
pub struct MockTransportCall {
    pub url: String,
    pub user_agent: String,

    /// When the request started (tokio clock, so paused-time tests work)
    pub at: Instant,
}

/// A mock transport with per-URL scripted replies.
///
/// Unknown URLs answer 404. A URL given a sequence of replies walks through
/// it; the last reply repeats once the sequence is exhausted.
#[derive(Default)]
pub struct MockTransport {
    replies: Arc<RwLock<HashMap<String, Vec<MockReply>>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    calls: Arc<RwLock<Vec<MockTransportCall>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `url` with `reply`.
    pub fn with_reply(self, url: impl Into<String>, reply: MockReply) -> Self {
        self.replies.write().unwrap().insert(url.into(), vec![reply]);
        self
    }

    /// Answer successive requests to `url` from `replies`.
    pub fn with_sequence(self, url: impl Into<String>, replies: Vec<MockReply>) -> Self {
        self.replies.write().unwrap().insert(url.into(), replies);
        self
    }

    /// Serve `url` as a 200 with the given media type.
    pub fn with_page(self, url: impl Into<String>, media_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let response = TransportResponse::new(200, body).with_media_type(media_type);
        self.with_reply(url, MockReply::Response(response))
    }

    /// Delay every response for `url`.
    pub fn with_delay(self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.write().unwrap().insert(url.into(), delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockTransportCall> {
        self.calls.read().unwrap().clone()
    }

    /// Calls made for one URL.
    pub fn calls_for(&self, url: &str) -> Vec<MockTransportCall> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .cloned()
            .collect()
    }

    fn next_reply(&self, url: &str) -> MockReply {
        let mut replies = self.replies.write().unwrap();
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => MockReply::Response(TransportResponse::new(404, "not found")),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        url: &str,
        user_agent: &str,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.write().unwrap().push(MockTransportCall {
            url: url.to_string(),
            user_agent: user_agent.to_string(),
            at: Instant::now(),
        });

        let delay = self.delays.read().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(url) {
            MockReply::Response(response) => Ok(response),
            MockReply::Timeout => Err(TransportError::Timeout),
            MockReply::Connection(msg) => Err(TransportError::Connection(msg)),
        }
    }
}

#[derive(Debug, Clone)]
enum Script {
    Reply(StagePayload),
    Fail(StageError),
}

/// Record of a call made to a scripted stage.
#[derive(Debug, Clone)]
pub struct StageCall {
    pub text: String,
    pub query: Option<String>,

    /// Names of stages present in the context, in order
    pub context_stages: Vec<String>,
}

/// An analysis stage with a canned reply.
#[derive(Clone)]
pub struct ScriptedStage {
    name: String,
    confidence_field: Option<String>,
    required_fields: Vec<String>,
    default: Script,
    by_text: Arc<RwLock<Vec<(String, Script)>>>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<StageCall>>>,
}

impl ScriptedStage {
    /// A stage replying with an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confidence_field: Some("confidence_score".to_string()),
            required_fields: Vec::new(),
            default: Script::Reply(StagePayload::default()),
            by_text: Arc::new(RwLock::new(Vec::new())),
            delay: None,
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Reply with `payload`.
    pub fn returning(mut self, payload: StagePayload) -> Self {
        self.default = Script::Reply(payload);
        self
    }

    /// Fail with `error`.
    pub fn failing(mut self, error: StageError) -> Self {
        self.default = Script::Fail(error);
        self
    }

    /// Reply with `payload` when the text contains `needle`.
    pub fn returning_for(self, needle: impl Into<String>, payload: StagePayload) -> Self {
        self.by_text
            .write()
            .unwrap()
            .push((needle.into(), Script::Reply(payload)));
        self
    }

    /// Fail with `error` when the text contains `needle`.
    pub fn failing_for(self, needle: impl Into<String>, error: StageError) -> Self {
        self.by_text
            .write()
            .unwrap()
            .push((needle.into(), Script::Fail(error)));
        self
    }

    /// Sleep before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_confidence_field(mut self, field: Option<&str>) -> Self {
        self.confidence_field = field.map(str::to_string);
        self
    }

    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Get all calls made to this stage.
    pub fn calls(&self) -> Vec<StageCall> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisStage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn confidence_field(&self) -> Option<&str> {
        self.confidence_field.as_deref()
    }

    fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    async fn run(&self, input: &StageInput<'_>) -> StageResult<StagePayload> {
        self.calls.write().unwrap().push(StageCall {
            text: input.text.to_string(),
            query: input.query.map(str::to_string),
            context_stages: input.context.iter().map(|(n, _)| n.to_string()).collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .by_text
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| input.text.contains(needle.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| self.default.clone());

        match script {
            Script::Reply(payload) => Ok(payload),
            Script::Fail(error) => Err(error),
        }
    }
}

/// A `MemoryStore` wrapper that fails selected operations.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_inserts: bool,
    fail_reviews: bool,
    fail_lookups: bool,
    unavailable: bool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `insert` fails with a backend error.
    pub fn fail_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    /// Every `save_review` fails with a backend error.
    pub fn fail_reviews(mut self) -> Self {
        self.fail_reviews = true;
        self
    }

    /// `find_by_hash` and `find_by_locator` fail with a backend error.
    pub fn fail_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    /// `health_check` reports the store as unavailable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn backend(op: &str) -> StoreError {
        StoreError::Backend(format!("injected {} failure", op).into())
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(id).await
    }

    async fn find_by_hash(&self, content_hash: &str) -> StoreResult<Option<StoredDocument>> {
        if self.fail_lookups {
            return Err(Self::backend("lookup"));
        }
        self.inner.find_by_hash(content_hash).await
    }

    async fn find_by_locator(&self, locator: &str) -> StoreResult<Option<StoredDocument>> {
        if self.fail_lookups {
            return Err(Self::backend("lookup"));
        }
        self.inner.find_by_locator(locator).await
    }

    async fn insert(&self, doc: NormalizedDocument) -> StoreResult<StoredDocument> {
        if self.fail_inserts {
            return Err(Self::backend("insert"));
        }
        self.inner.insert(doc).await
    }

    async fn save_review(&self, review: ReviewRecord) -> StoreResult<Uuid> {
        if self.fail_reviews {
            return Err(Self::backend("review"));
        }
        self.inner.save_review(review).await
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Option<ReviewRecord>> {
        self.inner.get_review(id).await
    }

    async fn pending_reviews(&self) -> StoreResult<Vec<ReviewRecord>> {
        self.inner.pending_reviews().await
    }

    async fn health_check(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::analysis::AnalysisContext;
    use serde_json::Map;

    #[tokio::test]
    async fn test_mock_transport_sequence_then_repeat() {
        let transport = MockTransport::new().with_sequence(
            "https://a.test/x",
            vec![MockReply::Timeout, MockReply::Response(TransportResponse::new(200, "ok"))],
        );

        assert!(matches!(
            transport.get("https://a.test/x", "ua", Duration::from_secs(1)).await,
            Err(TransportError::Timeout)
        ));
        for _ in 0..2 {
            let response = transport
                .get("https://a.test/x", "ua", Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(response.status, 200);
        }
        assert_eq!(transport.calls_for("https://a.test/x").len(), 3);
    }

    #[tokio::test]
    async fn test_mock_transport_unknown_is_404() {
        let transport = MockTransport::new();
        let response = transport
            .get("https://a.test/missing", "ua", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_scripted_stage_by_text() {
        let stage = ScriptedStage::new("legal")
            .returning(StagePayload::default().with("confidence_score", 0.5))
            .returning_for("merger", StagePayload::default().with("confidence_score", 0.9));

        let ctx = AnalysisContext::new();
        let initial = Map::new();
        let merger_input = StageInput {
            text: "a merger order",
            query: None,
            context: &ctx,
            initial: &initial,
        };
        let other_input = StageInput {
            text: "a tax order",
            ..merger_input
        };

        let merger = stage.run(&merger_input).await.unwrap();
        let other = stage.run(&other_input).await.unwrap();
        assert_eq!(merger.confidence("confidence_score"), Some(0.9));
        assert_eq!(other.confidence("confidence_score"), Some(0.5));
        assert_eq!(stage.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = FailingStore::new().unavailable().fail_reviews();
        assert!(matches!(store.health_check().await, Err(StoreError::Unavailable(_))));
        assert!(store.pending_reviews().await.unwrap().is_empty());
    }
}
