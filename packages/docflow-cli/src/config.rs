//! Run configuration: JSON config file plus command-line overrides.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docflow::{
    legal_review_checks, standard_workflows, CheckSpec, ConsolidationRules, RemoteStageConfig,
    RunConfig, SourceSpec,
};

/// Command-line surface. Every flag also reads an environment variable.
#[derive(Debug, Parser)]
#[command(name = "docflow")]
#[command(about = "Ingest documents politely, deduplicate them, and run gated analysis")]
pub struct Cli {
    /// Source selector: `all` or a source name
    #[arg(long, env = "DOCFLOW_SOURCES", default_value = "all")]
    pub sources: String,

    #[arg(long, env = "DOCFLOW_LOOKBACK_DAYS")]
    pub lookback_days: Option<u32>,

    #[arg(long, env = "DOCFLOW_MAX_CANDIDATES")]
    pub max_candidates: Option<usize>,

    #[arg(long, env = "DOCFLOW_INGEST_CONCURRENCY")]
    pub ingest_concurrency: Option<usize>,

    #[arg(long, env = "DOCFLOW_ANALYSIS_CONCURRENCY")]
    pub analysis_concurrency: Option<usize>,

    /// Minimum quality score for approval
    #[arg(long, env = "DOCFLOW_THRESHOLD")]
    pub threshold: Option<f64>,

    #[arg(long, env = "DOCFLOW_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "DOCFLOW_BASE_BACKOFF_MS")]
    pub base_backoff_ms: Option<u64>,

    /// Minimum spacing between requests to one origin
    #[arg(long, env = "DOCFLOW_MIN_INTERVAL_MS")]
    pub min_interval_ms: Option<u64>,

    /// Cancel the run after this many seconds
    #[arg(long, env = "DOCFLOW_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Workflow to run (unknown names fall back to the default)
    #[arg(long, env = "DOCFLOW_WORKFLOW")]
    pub workflow: Option<String>,

    /// Research question passed to every stage
    #[arg(long, env = "DOCFLOW_QUERY")]
    pub query: Option<String>,

    /// JSON config file declaring sources, stages, workflows, and the gate
    #[arg(long, env = "DOCFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite URL; documents are kept in memory when unset
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "DOCFLOW_LOG_JSON")]
    pub log_json: bool,
}

fn default_workflow() -> String {
    "comprehensive".to_string()
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub run: RunConfig,
    pub sources: Vec<SourceSpec>,
    pub stages: Vec<RemoteStageConfig>,
    pub workflows: IndexMap<String, Vec<String>>,
    pub default_workflow: String,
    pub checks: Vec<CheckSpec>,
    pub consolidation: ConsolidationRules,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            sources: Vec::new(),
            stages: Vec::new(),
            workflows: standard_workflows(),
            default_workflow: default_workflow(),
            checks: legal_review_checks(),
            consolidation: ConsolidationRules::default(),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load the file if one was given, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Every stage a workflow names must be declared under `stages`.
    ///
    /// The built-in workflows name the legal review stages, so running
    /// without a config file fails here until their endpoints are declared.
    pub fn validate(&self) -> Result<()> {
        for (workflow, stages) in &self.workflows {
            if let Some(missing) = stages
                .iter()
                .find(|name| !self.stages.iter().any(|s| &s.name == *name))
            {
                bail!(
                    "workflow `{}` uses stage `{}`, which is not declared under `stages`; \
                     pass --config with a `stages` entry giving its endpoint",
                    workflow,
                    missing
                );
            }
        }
        Ok(())
    }
}

impl Cli {
    /// Apply command-line overrides on top of file values.
    pub fn apply(&self, mut run: RunConfig) -> RunConfig {
        if let Some(days) = self.lookback_days {
            run.window.lookback_days = days;
        }
        if let Some(max) = self.max_candidates {
            run.window.max_candidates = max;
        }
        if let Some(n) = self.ingest_concurrency {
            run.ingest = run.ingest.with_concurrency(n);
        }
        if let Some(n) = self.analysis_concurrency {
            run.analysis = run.analysis.with_concurrency(n);
        }
        if let Some(threshold) = self.threshold {
            run.gate = run.gate.with_threshold(threshold);
        }
        if let Some(retries) = self.max_retries {
            run.fetch = run.fetch.with_max_retries(retries);
        }
        if let Some(ms) = self.base_backoff_ms {
            run.fetch = run.fetch.with_base_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = self.min_interval_ms {
            run.fetch = run.fetch.with_min_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = self.deadline_secs {
            run = run.with_deadline(Duration::from_secs(secs));
        }
        if let Some(workflow) = &self.workflow {
            run.analysis = run.analysis.with_workflow(workflow.clone());
        }
        if let Some(query) = &self.query {
            run.analysis = run.analysis.with_query(query.clone());
        }
        run
    }
}
