//! Bulk analysis - orchestrate, gate, and route a batch of stored documents.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::consolidate::synthesize;
use crate::pipeline::gate::QualityGate;
use crate::pipeline::orchestrator::{StageOrchestrator, Workflow};
use crate::traits::store::DocumentStore;
use crate::types::{
    analysis::{Decision, Synthesis, Verdict},
    config::AnalysisConfig,
    document::StoredDocument,
};

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Gate decided; `review_id` is set when the decision was flagged
    Decided {
        decision: Box<Decision>,
        review_id: Option<Uuid>,
    },

    /// Routing the decision to the store failed
    Error { error: String },

    /// Run was cancelled before the document was analyzed
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentAnalysis {
    pub document_id: Uuid,
    #[serde(flatten)]
    pub outcome: AnalysisOutcome,
}

impl DocumentAnalysis {
    pub fn decision(&self) -> Option<&Decision> {
        match &self.outcome {
            AnalysisOutcome::Decided { decision, .. } => Some(decision),
            _ => None,
        }
    }

    pub fn review_id(&self) -> Option<Uuid> {
        match &self.outcome {
            AnalysisOutcome::Decided { review_id, .. } => *review_id,
            _ => None,
        }
    }
}

/// Result of one analysis batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    /// One entry per document, in input order
    pub documents: Vec<DocumentAnalysis>,

    pub approved: usize,
    pub flagged: usize,
    pub errors: usize,

    /// Themes shared across the decided documents
    pub synthesis: Synthesis,
}

impl AnalysisReport {
    fn new(documents: Vec<DocumentAnalysis>, top_n: usize) -> Self {
        let mut report = Self::default();
        let mut results = Vec::new();
        for d in &documents {
            match &d.outcome {
                AnalysisOutcome::Decided { decision, .. } => {
                    match decision.verdict {
                        Verdict::Approved => report.approved += 1,
                        Verdict::Flagged => report.flagged += 1,
                    }
                    results.push(decision.result.clone());
                }
                AnalysisOutcome::Error { .. } | AnalysisOutcome::Cancelled => report.errors += 1,
            }
        }
        report.synthesis = synthesize(&results, top_n);
        report.documents = documents;
        report
    }

    /// Ids of the review records created by this batch.
    pub fn review_ids(&self) -> Vec<Uuid> {
        self.documents.iter().filter_map(|d| d.review_id()).collect()
    }
}

#[derive(Clone)]
struct Shared {
    orchestrator: StageOrchestrator,
    workflow: Workflow,
    gate: QualityGate,
    store: Arc<dyn DocumentStore>,
    config: AnalysisConfig,
    cancel: CancellationToken,
}

/// Analyzes documents on a bounded pool and routes flagged decisions.
#[derive(Clone)]
pub struct AnalysisRunner {
    shared: Shared,
}

impl AnalysisRunner {
    pub fn new(workflow: Workflow, gate: QualityGate, store: Arc<dyn DocumentStore>) -> Self {
        let config = AnalysisConfig::default();
        Self {
            shared: Shared {
                orchestrator: StageOrchestrator::new().with_stage_timeout(config.stage_timeout),
                workflow,
                gate,
                store,
                config,
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Apply concurrency, stage timeout, query, and synthesis settings.
    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.shared.orchestrator = self
            .shared
            .orchestrator
            .clone()
            .with_stage_timeout(config.stage_timeout);
        self.shared.config = config;
        self
    }

    /// Replace the orchestrator (custom consolidation rules).
    pub fn with_orchestrator(mut self, orchestrator: StageOrchestrator) -> Self {
        self.shared.orchestrator = orchestrator.with_cancellation(self.shared.cancel.clone());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shared.orchestrator = self.shared.orchestrator.clone().with_cancellation(token.clone());
        self.shared.cancel = token;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.shared.workflow
    }

    /// Analyze a batch. Per-document failures are reported, never raised.
    pub async fn run(&self, documents: Vec<StoredDocument>) -> AnalysisReport {
        let total = documents.len();
        info!(
            documents = total,
            workflow = %self.shared.workflow.name(),
            concurrency = self.shared.config.concurrency,
            "analysis batch starting"
        );

        let ids: Vec<Uuid> = documents.iter().map(|d| d.id).collect();
        let shared = Arc::new(self.shared.clone());
        let semaphore = Arc::new(Semaphore::new(self.shared.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, document) in documents.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => analyze_one(&shared, document).await,
                    Err(_) => AnalysisOutcome::Error {
                        error: "worker pool closed".into(),
                    },
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<AnalysisOutcome>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "analysis worker failed"),
            }
        }

        let analyses = ids
            .into_iter()
            .zip(slots)
            .map(|(document_id, slot)| DocumentAnalysis {
                document_id,
                outcome: slot.unwrap_or_else(|| AnalysisOutcome::Error {
                    error: "worker panicked".into(),
                }),
            })
            .collect();

        let report = AnalysisReport::new(analyses, self.shared.config.synthesis_top_n);
        info!(
            approved = report.approved,
            flagged = report.flagged,
            errors = report.errors,
            "analysis batch complete"
        );
        report
    }
}

async fn analyze_one(shared: &Shared, document: StoredDocument) -> AnalysisOutcome {
    if shared.cancel.is_cancelled() {
        return AnalysisOutcome::Cancelled;
    }

    let initial = document_metadata(&document);
    let result = shared
        .orchestrator
        .analyze(
            &document.text,
            &shared.workflow,
            shared.config.query.as_deref(),
            &initial,
        )
        .await;
    if shared.cancel.is_cancelled() {
        return AnalysisOutcome::Cancelled;
    }
    let decision = shared.gate.evaluate(&result);

    match shared
        .gate
        .route(document.id, &decision, shared.store.as_ref())
        .await
    {
        Ok(review_id) => AnalysisOutcome::Decided {
            decision: Box::new(decision),
            review_id,
        },
        Err(e) => {
            warn!(document_id = %document.id, error = %e, "failed to route decision");
            AnalysisOutcome::Error {
                error: e.to_string(),
            }
        }
    }
}

/// Document fields handed to every stage as the initial context.
fn document_metadata(document: &StoredDocument) -> Map<String, Value> {
    let value = json!({
        "document_id": document.id,
        "locator": document.locator,
        "title": document.title,
        "source": document.source,
        "declared_date": document.declared_date,
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::stores::MemoryStore;
    use crate::testing::{FailingStore, ScriptedStage};
    use crate::types::{
        analysis::StagePayload, config::GateConfig, document::NormalizedDocument,
    };
    use std::time::Duration;

    fn payload(value: Value) -> StagePayload {
        StagePayload::from_value(value).unwrap()
    }

    async fn stored(store: &dyn DocumentStore, text: &str) -> StoredDocument {
        store
            .insert(NormalizedDocument {
                locator: format!("https://a.test/{}", text.len()),
                text: text.to_string(),
                content_hash: crate::dedup::content_hash(text),
                source: "s".into(),
                declared_date: None,
                title: Some("Order".into()),
                media_type: None,
            })
            .await
            .unwrap()
    }

    fn workflow() -> Workflow {
        let scorer = ScriptedStage::new("scorer")
            .returning(payload(json!({ "confidence_score": 0.97, "legal_issues": ["Limitation"] })))
            .returning_for("weak", payload(json!({ "confidence_score": 0.80 })));
        Workflow::new("w").with_stage(Arc::new(scorer))
    }

    #[tokio::test]
    async fn test_batch_counts_and_routes_flagged() {
        let store = Arc::new(MemoryStore::new());
        let strong = stored(store.as_ref(), "a strong order").await;
        let weak = stored(store.as_ref(), "a weak order on appeal").await;

        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let runner = AnalysisRunner::new(workflow(), gate, store.clone());

        let report = runner.run(vec![strong.clone(), weak.clone()]).await;

        assert_eq!(report.approved, 1);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.documents[0].document_id, strong.id);
        assert_eq!(report.documents[0].review_id(), None);

        let review_id = report.documents[1].review_id().unwrap();
        let review = store.get_review(review_id).await.unwrap().unwrap();
        assert_eq!(review.document_id, weak.id);
        assert_eq!(
            review.recommendations,
            vec!["Improve content depth and analysis comprehensiveness"]
        );
        assert_eq!(store.review_count(), 1);
    }

    #[tokio::test]
    async fn test_stages_see_document_metadata() {
        let store = Arc::new(MemoryStore::new());
        let doc = stored(store.as_ref(), "metadata order").await;

        #[derive(Default)]
        struct Echo;

        #[async_trait::async_trait]
        impl crate::traits::stage::AnalysisStage for Echo {
            fn name(&self) -> &str {
                "echo"
            }

            async fn run(
                &self,
                input: &crate::types::analysis::StageInput<'_>,
            ) -> crate::error::StageResult<StagePayload> {
                Ok(payload(json!({
                    "confidence_score": 1.0,
                    "title": input.initial.get("title").cloned().unwrap_or(Value::Null),
                })))
            }
        }

        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let runner = AnalysisRunner::new(Workflow::new("w").with_stage(Arc::new(Echo)), gate, store);

        let report = runner.run(vec![doc]).await;
        let decision = report.documents[0].decision().unwrap();
        let echoed = decision.result.outcomes[0].payload().unwrap().get("title");

        assert_eq!(echoed, Some(&json!("Order")));
    }

    #[tokio::test]
    async fn test_review_store_failure_is_an_error() {
        let store = Arc::new(FailingStore::new().fail_reviews());
        let doc = stored(store.as_ref(), "weak order").await;

        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let runner = AnalysisRunner::new(workflow(), gate, store);

        let report = runner.run(vec![doc]).await;

        assert_eq!(report.errors, 1);
        assert!(matches!(report.documents[0].outcome, AnalysisOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_fail_document() {
        let store = Arc::new(MemoryStore::new());
        let doc = stored(store.as_ref(), "some order").await;

        let wf = Workflow::new("w")
            .with_stage(Arc::new(ScriptedStage::new("broken").failing(StageError::Failed("500".into()))))
            .with_stage(Arc::new(
                ScriptedStage::new("ok").returning(payload(json!({ "confidence_score": 0.99 }))),
            ));
        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let runner = AnalysisRunner::new(wf, gate, store);

        let report = runner.run(vec![doc]).await;

        let decision = report.documents[0].decision().unwrap();
        assert_eq!(decision.result.failed_stages(), vec!["broken"]);
        assert_eq!(report.approved, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounds_documents_in_flight() {
        let store = Arc::new(MemoryStore::new());
        let mut docs = Vec::new();
        for i in 0..4 {
            docs.push(stored(store.as_ref(), &format!("order {}{}", i, "x".repeat(i))).await);
        }

        let slow = ScriptedStage::new("slow")
            .returning(payload(json!({ "confidence_score": 1.0 })))
            .with_delay(Duration::from_secs(10));
        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let runner = AnalysisRunner::new(Workflow::new("w").with_stage(Arc::new(slow)), gate, store)
            .with_config(AnalysisConfig::default().with_concurrency(2));

        let started = tokio::time::Instant::now();
        let report = runner.run(docs).await;

        assert_eq!(report.approved, 4);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_cancelled_batch() {
        let store = Arc::new(MemoryStore::new());
        let doc = stored(store.as_ref(), "order").await;
        let token = CancellationToken::new();
        token.cancel();

        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let runner = AnalysisRunner::new(workflow(), gate, store.clone()).with_cancellation(token);

        let report = runner.run(vec![doc]).await;

        assert_eq!(report.documents[0].outcome, AnalysisOutcome::Cancelled);
        assert_eq!(report.errors, 1);
        assert_eq!(store.review_count(), 0);
    }
}
