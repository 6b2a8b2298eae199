//! End-to-end tests for a full run.
//!
//! These tests wire every layer together with mocks:
//! 1. Discover candidates from a static source
//! 2. Fetch them politely through the mock transport
//! 3. Deduplicate and store
//! 4. Analyze, gate, and route to review

use docflow::{
    testing::{MockTransport, ScriptedStage},
    Candidate, DocumentStore, DuplicateKind, FetchError, FetchPolicy, GateConfig, IngestConfig,
    IngestError, MemoryStore, Outcome, PoliteFetcher, QualityGate, ReviewStatus, Run, RunConfig,
    SourceCatalog, StageError, StagePayload, StaticSource, Verdict, Workflow, WorkflowRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const BODY: &str = "IN THE NATIONAL COMPANY LAW TRIBUNAL\n\
    The petition under section 7 is admitted. The moratorium applies from the date of this order \
    and the interim resolution professional shall take charge of the corporate debtor forthwith. \
    Creditors shall file claims within fourteen days of the public announcement.";

fn policy() -> FetchPolicy {
    FetchPolicy::default()
        .with_min_interval(Duration::from_millis(500))
        .with_robots(false)
}

fn payload(value: serde_json::Value) -> StagePayload {
    StagePayload::from_value(value).unwrap()
}

fn registry(stages: Vec<ScriptedStage>) -> WorkflowRegistry {
    let workflow = stages
        .into_iter()
        .fold(Workflow::new("comprehensive"), |w, s| w.with_stage(Arc::new(s)));
    WorkflowRegistry::new(vec![workflow], "comprehensive").unwrap()
}

fn run(
    transport: MockTransport,
    candidates: Vec<Candidate>,
    store: Arc<MemoryStore>,
    stages: Vec<ScriptedStage>,
    config: RunConfig,
) -> Run {
    let fetcher = Arc::new(PoliteFetcher::new(Arc::new(transport), &config.fetch));
    let catalog = SourceCatalog::new()
        .with_source(Arc::new(StaticSource::new("tribunal").with_candidates(candidates)));
    let gate = QualityGate::new(GateConfig::default()).unwrap();
    Run::new(catalog, fetcher, store, registry(stages), gate).with_config(config)
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_and_missing_documents_end_to_end() {
    let transport = MockTransport::new()
        .with_page("https://nclt.test/orders/a", "text/plain", BODY)
        .with_page("https://nclt.test/orders/b", "text/plain", BODY);
    let candidates = vec![
        Candidate::new("https://nclt.test/orders/a", ""),
        Candidate::new("https://nclt.test/orders/b", ""),
        Candidate::new("https://nclt.test/orders/c", ""),
    ];
    let store = Arc::new(MemoryStore::new());
    let reviewer = ScriptedStage::new("reviewer").returning(payload(json!({ "confidence_score": 0.97 })));
    let config = RunConfig {
        fetch: policy(),
        ingest: IngestConfig::default().with_concurrency(2),
        ..Default::default()
    };

    let report = run(transport, candidates, store.clone(), vec![reviewer], config)
        .execute("all")
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(store.document_count(), 1);

    let outcomes = &report.ingestion[0].outcomes;
    assert_eq!(outcomes[2].locator, "https://nclt.test/orders/c");
    assert_eq!(
        outcomes[2].outcome,
        Outcome::Error(IngestError::Fetch(FetchError::PermanentStatus(404)))
    );
    let duplicate = outcomes
        .iter()
        .find_map(|o| match o.outcome {
            Outcome::Duplicate { existing_id, kind } => Some((existing_id, kind)),
            _ => None,
        })
        .unwrap();
    assert_eq!(duplicate.1, DuplicateKind::Content);
    assert_eq!(Some(duplicate.0), report.ingestion[0].stored_ids().first().copied());

    // Only the stored document is analyzed.
    assert_eq!(report.analysis.documents.len(), 1);
    assert_eq!(report.approved, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_is_idempotent() {
    let transport = MockTransport::new().with_page("https://nclt.test/orders/a", "text/plain", BODY);
    let store = Arc::new(MemoryStore::new());
    let reviewer = ScriptedStage::new("reviewer").returning(payload(json!({ "confidence_score": 0.99 })));
    let config = RunConfig {
        fetch: policy(),
        ..Default::default()
    };
    let run = run(
        transport,
        vec![Candidate::new("https://nclt.test/orders/a", "")],
        store.clone(),
        vec![reviewer.clone()],
        config,
    );

    let first = run.execute("tribunal").await.unwrap();
    let second = run.execute("tribunal").await.unwrap();

    assert_eq!(first.succeeded, 1);
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(store.document_count(), 1);
    // Nothing new was stored, so nothing new was analyzed.
    assert_eq!(reviewer.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_gate_routes_low_scores_to_review() {
    let strong = format!("{}\nStrong order.", BODY);
    let weak = format!("{}\nWeak order.", BODY);
    let candidates = vec![
        Candidate::new("manual:strong", "").with_inline_text(strong),
        Candidate::new("manual:weak", "").with_inline_text(weak),
    ];
    let reviewer = ScriptedStage::new("reviewer")
        .returning(payload(json!({ "confidence_score": 0.97 })))
        .returning_for("Weak order", payload(json!({ "confidence_score": 0.80 })));
    let store = Arc::new(MemoryStore::new());
    let config = RunConfig {
        fetch: policy(),
        ..Default::default()
    };

    let report = run(MockTransport::new(), candidates, store.clone(), vec![reviewer], config)
        .execute("all")
        .await
        .unwrap();

    assert_eq!(report.approved, 1);
    assert_eq!(report.flagged, 1);
    assert_eq!(store.review_count(), 1);

    let pending = store.pending_reviews().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, ReviewStatus::Pending);
    assert!((pending[0].score - 0.80).abs() < 1e-9);
    assert_eq!(pending[0].threshold, 0.95);

    let flagged = report
        .analysis
        .documents
        .iter()
        .find(|d| d.review_id().is_some())
        .unwrap();
    assert_eq!(flagged.decision().unwrap().verdict, Verdict::Flagged);
    assert_eq!(pending[0].document_id, flagged.document_id);
}

#[tokio::test(start_paused = true)]
async fn test_failing_stage_is_isolated() {
    let legal = ScriptedStage::new("legal_analyst")
        .returning(payload(json!({ "confidence_score": 0.96, "legal_issues": ["Moratorium"] })));
    let cs = ScriptedStage::new("cs_expert").failing(StageError::Failed("backend 500".into()));
    let quality = ScriptedStage::new("quality_reviewer")
        .with_confidence_field(Some("overall_quality_score"))
        .returning(payload(json!({ "overall_quality_score": 0.98 })));
    let store = Arc::new(MemoryStore::new());
    let config = RunConfig {
        fetch: policy(),
        ..Default::default()
    };

    let report = run(
        MockTransport::new(),
        vec![Candidate::new("manual:1", "").with_inline_text(BODY)],
        store,
        vec![legal, cs, quality.clone()],
        config,
    )
    .execute("all")
    .await
    .unwrap();

    let decision = report.analysis.documents[0].decision().unwrap();
    let stages: Vec<_> = decision.result.outcomes.iter().map(|o| o.stage.as_str()).collect();
    assert_eq!(stages, vec!["legal_analyst", "cs_expert", "quality_reviewer"]);
    assert_eq!(decision.result.failed_stages(), vec!["cs_expert"]);

    // The last stage still ran and saw only the completed stage in context.
    let calls = quality.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].context_stages, vec!["legal_analyst"]);

    // Score is the mean of the two usable signals.
    assert!((decision.score - 0.97).abs() < 1e-9);
    assert_eq!(decision.verdict, Verdict::Approved);
}
