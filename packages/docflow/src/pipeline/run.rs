//! Full run: discover, ingest, and analyze under one cancellation token.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::extractors::TextExtractor;
use crate::fetch::PoliteFetcher;
use crate::pipeline::analyze::{AnalysisReport, AnalysisRunner};
use crate::pipeline::gate::QualityGate;
use crate::pipeline::ingest::{IngestReport, IngestionPipeline};
use crate::pipeline::orchestrator::{StageOrchestrator, WorkflowRegistry};
use crate::sources::SourceCatalog;
use crate::traits::{extractor::ContentExtractor, store::DocumentStore};
use crate::types::config::RunConfig;

/// A source whose discovery failed. The run continues without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

/// Summary of one full run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One ingestion report per source that discovered candidates
    pub ingestion: Vec<IngestReport>,

    pub source_failures: Vec<SourceFailure>,
    pub analysis: AnalysisReport,

    pub succeeded: usize,
    pub duplicates: usize,

    /// Ingestion errors plus analysis errors
    pub errors: usize,

    pub approved: usize,
    pub flagged: usize,

    /// The deadline or an external cancel stopped the run early
    pub cancelled: bool,
}

impl RunReport {
    fn new(
        ingestion: Vec<IngestReport>,
        source_failures: Vec<SourceFailure>,
        analysis: AnalysisReport,
        cancelled: bool,
    ) -> Self {
        let succeeded = ingestion.iter().map(|r| r.succeeded).sum();
        let duplicates = ingestion.iter().map(|r| r.duplicates).sum();
        let ingest_errors: usize = ingestion.iter().map(|r| r.errors).sum();
        Self {
            succeeded,
            duplicates,
            errors: ingest_errors + analysis.errors,
            approved: analysis.approved,
            flagged: analysis.flagged,
            ingestion,
            source_failures,
            analysis,
            cancelled,
        }
    }
}

/// Wires sources, ingestion, and analysis together for one run.
pub struct Run {
    catalog: SourceCatalog,
    fetcher: Arc<PoliteFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    store: Arc<dyn DocumentStore>,
    workflows: WorkflowRegistry,
    gate: QualityGate,
    orchestrator: StageOrchestrator,
    config: RunConfig,
    cancel: CancellationToken,
}

impl Run {
    /// The run observes the fetcher's cancellation token. Each `execute`
    /// works under a child token, so a deadline ends only that execution.
    pub fn new(
        catalog: SourceCatalog,
        fetcher: Arc<PoliteFetcher>,
        store: Arc<dyn DocumentStore>,
        workflows: WorkflowRegistry,
        gate: QualityGate,
    ) -> Self {
        let cancel = fetcher.cancellation_token().clone();
        Self {
            catalog,
            fetcher,
            extractor: Arc::new(TextExtractor::new()),
            store,
            workflows,
            gate,
            orchestrator: StageOrchestrator::new(),
            config: RunConfig::default(),
            cancel,
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Custom consolidation rules.
    pub fn with_orchestrator(mut self, orchestrator: StageOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Execute a run for `selector` (`all` or a source name).
    ///
    /// Fails only on an unknown selector or an unhealthy store. Everything
    /// else is reported.
    pub async fn execute(&self, selector: &str) -> Result<RunReport> {
        let sources = self.catalog.resolve(selector)?;
        self.store.health_check().await?;

        info!(
            selector = %selector,
            sources = sources.len(),
            lookback_days = self.config.window.lookback_days,
            max_candidates = self.config.window.max_candidates,
            "run starting"
        );
        let cancel = self.cancel.child_token();
        let deadline = self.spawn_deadline(&cancel);

        let ingestion = IngestionPipeline::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.extractor),
            Arc::clone(&self.store),
        )
        .with_policy(self.config.fetch.clone())
        .with_config(self.config.ingest.clone())
        .with_cancellation(cancel.clone());

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        let mut stored = Vec::new();

        for source in sources {
            if cancel.is_cancelled() {
                break;
            }
            let candidates = match source.discover(&self.config.window).await {
                Ok(found) => self.config.window.apply(found),
                Err(e) => {
                    warn!(source = %source.name(), error = %e, "discovery failed");
                    failures.push(SourceFailure {
                        source: source.name().to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let report = ingestion.run(candidates, source.name()).await;
            stored.extend(report.stored_ids());
            reports.push(report);
        }

        let mut documents = Vec::with_capacity(stored.len());
        for id in stored {
            match self.store.get(id).await {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => warn!(document_id = %id, "stored document vanished before analysis"),
                Err(e) => warn!(document_id = %id, error = %e, "failed to load stored document"),
            }
        }

        let workflow = self
            .workflows
            .for_analysis(&self.config.analysis.workflow, self.config.analysis.query.as_deref())
            .clone();
        let analysis = AnalysisRunner::new(workflow, self.gate.clone(), Arc::clone(&self.store))
            .with_orchestrator(self.orchestrator.clone())
            .with_cancellation(cancel.clone())
            .with_config(self.config.analysis.clone())
            .run(documents)
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        let report = RunReport::new(reports, failures, analysis, cancel.is_cancelled());
        info!(
            succeeded = report.succeeded,
            duplicates = report.duplicates,
            errors = report.errors,
            approved = report.approved,
            flagged = report.flagged,
            cancelled = report.cancelled,
            "run complete"
        );
        Ok(report)
    }

    fn spawn_deadline(&self, cancel: &CancellationToken) -> Option<JoinHandle<()>> {
        let deadline = self.config.deadline?;
        let token = cancel.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(deadline_ms = deadline.as_millis() as u64, "run deadline reached, cancelling");
            token.cancel();
        }))
    }
}
