//! docflow command-line runner
//!
//! Discovers documents from the configured sources, ingests them, runs the
//! analysis workflow, and prints a JSON summary of the run.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indexmap::IndexMap;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use docflow::{
    AnalysisStage, DocumentStore, MemoryStore, PoliteFetcher, QualityGate, RemoteStage,
    ReqwestTransport, Run, RunReport, SourceCatalog, SqliteStore, StageOrchestrator, Synthesis,
    WorkflowRegistry,
};

use crate::config::{Cli, FileConfig};

#[derive(Serialize)]
struct SourceSummary {
    source: String,
    succeeded: usize,
    duplicates: usize,
    errors: usize,
}

#[derive(Serialize)]
struct RunSummary {
    sources: Vec<SourceSummary>,
    source_failures: Vec<docflow::pipeline::SourceFailure>,
    succeeded: usize,
    duplicates: usize,
    errors: usize,
    approved: usize,
    flagged: usize,
    review_ids: Vec<Uuid>,
    cancelled: bool,
    synthesis: Synthesis,
}

impl From<RunReport> for RunSummary {
    fn from(report: RunReport) -> Self {
        Self {
            sources: report
                .ingestion
                .iter()
                .map(|r| SourceSummary {
                    source: r.source.clone(),
                    succeeded: r.succeeded,
                    duplicates: r.duplicates,
                    errors: r.errors,
                })
                .collect(),
            review_ids: report.analysis.review_ids(),
            source_failures: report.source_failures,
            succeeded: report.succeeded,
            duplicates: report.duplicates,
            errors: report.errors,
            approved: report.approved,
            flagged: report.flagged,
            cancelled: report.cancelled,
            synthesis: report.analysis.synthesis,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,docflow=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .init();
    }
}

async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match database_url {
        Some(url) => Arc::new(
            SqliteStore::new(url)
                .await
                .context("Failed to connect to database")?,
        ),
        None => {
            tracing::warn!("DATABASE_URL not set, documents are kept in memory for this run");
            Arc::new(MemoryStore::new())
        }
    };
    store
        .health_check()
        .await
        .context("Document store is unavailable")?;
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables before clap reads its env fallbacks
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let file = FileConfig::load_or_default(cli.config.as_deref())?;
    let run_config = cli.apply(file.run.clone());
    tracing::info!(
        sources = %cli.sources,
        lookback_days = run_config.window.lookback_days,
        threshold = run_config.gate.threshold,
        "Starting docflow run"
    );

    let store = open_store(cli.database_url.as_deref()).await?;

    let fetcher = Arc::new(PoliteFetcher::new(
        Arc::new(ReqwestTransport::new()),
        &run_config.fetch,
    ));
    let catalog = SourceCatalog::from_specs(&file.sources, &fetcher, &run_config.fetch);
    catalog
        .resolve(&cli.sources)
        .with_context(|| format!("Known sources: {:?}", catalog.names().collect::<Vec<_>>()))?;

    let stages: IndexMap<String, Arc<dyn AnalysisStage>> = file
        .stages
        .iter()
        .map(|s| {
            let stage: Arc<dyn AnalysisStage> = Arc::new(RemoteStage::new(s.clone()));
            (s.name.clone(), stage)
        })
        .collect();
    let workflows = WorkflowRegistry::from_names(&stages, &file.workflows, &file.default_workflow)
        .context("Invalid workflow configuration")?;
    let gate = QualityGate::new(run_config.gate.clone())
        .context("Invalid quality gate configuration")?
        .with_checks(&file.checks);

    let cancel = fetcher.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let run = Run::new(catalog, fetcher, store, workflows, gate)
        .with_orchestrator(StageOrchestrator::new().with_rules(file.consolidation.clone()))
        .with_config(run_config);
    let report = run.execute(&cli.sources).await.context("Run failed")?;

    let summary = RunSummary::from(report);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize run summary")?
    );
    Ok(())
}
