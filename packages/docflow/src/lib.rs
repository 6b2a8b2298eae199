//! Document Ingestion and Staged Analysis Library
//!
//! Pulls candidate documents from external sources, fetches them politely,
//! stores each distinct text exactly once, and runs stored documents through
//! a multi-stage analysis whose consolidated result is scored by a quality
//! gate. Results below the threshold are routed to human review.
//!
//! # Usage
//!
//! ```rust,ignore
//! use docflow::{
//!     standard_workflows, GateConfig, MemoryStore, PoliteFetcher, QualityGate, ReqwestTransport,
//!     Run, RunConfig, SourceCatalog, WorkflowRegistry,
//! };
//!
//! let config = RunConfig::default();
//! let fetcher = Arc::new(PoliteFetcher::new(Arc::new(ReqwestTransport::new()), &config.fetch));
//! let catalog = SourceCatalog::from_specs(&specs, &fetcher, &config.fetch);
//! let workflows = WorkflowRegistry::from_names(&stages, &standard_workflows(), "comprehensive")?;
//! let gate = QualityGate::new(config.gate.clone())?;
//!
//! let run = Run::new(catalog, fetcher, Arc::new(MemoryStore::new()), workflows, gate)
//!     .with_config(config);
//! let report = run.execute("all").await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams for transport, extraction, stages, storage, discovery
//! - [`types`] - Documents, analysis results, configuration
//! - [`fetch`] - Polite fetching (spacing, robots.txt, retries)
//! - [`dedup`] - Content hashing and single-flight admission
//! - [`pipeline`] - Ingestion, orchestration, consolidation, gate, runs
//! - [`sources`] - Listing-page and static candidate sources
//! - [`stages`] - HTTP-backed analysis stages
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`testing`] - Mock implementations for testing

pub mod dedup;
pub mod error;
pub mod extractors;
pub mod fetch;
pub mod pipeline;
pub mod sources;
pub mod stages;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    ConfigError, ExtractError, FetchError, IngestError, PipelineError, Result, SourceError,
    StageError, StoreError, TransportError,
};
pub use traits::{
    extractor::ContentExtractor,
    source::CandidateSource,
    stage::AnalysisStage,
    store::DocumentStore,
    transport::{Transport, TransportResponse},
};
pub use types::{
    analysis::{
        AnalysisContext, ConsolidatedResult, Decision, Finding, QualityGrade, QualitySignal,
        StageInput, StageOutcome, StagePayload, StageStatus, Synthesis, Theme, Verdict,
    },
    config::{
        AnalysisConfig, DiscoveryWindow, FetchPolicy, GateConfig, IngestConfig, RunConfig,
    },
    document::{
        Candidate, FetchResult, NormalizedDocument, ReviewRecord, ReviewStatus, StoredDocument,
    },
};

pub use dedup::{content_hash, normalize_text, Admission, ContentDeduplicator};
pub use extractors::TextExtractor;
pub use fetch::{PoliteFetcher, ReqwestTransport, RobotsRules};

// Re-export pipeline components
pub use pipeline::{
    // Ingestion
    CandidateOutcome, DuplicateKind, IngestReport, IngestionPipeline, Outcome,
    // Orchestration
    quality_signal, standard_workflows, StageOrchestrator, StagePreference, Workflow,
    WorkflowRegistry,
    // Consolidation
    synthesize, ConsolidationRules, Consolidator, FindingRule,
    // Gate
    legal_review_checks, CheckSpec, QualityGate, StructuralCheck,
    // Analysis and runs
    AnalysisReport, AnalysisRunner, DocumentAnalysis, Run, RunReport,
};

pub use sources::{ListingConfig, ListingSource, SourceCatalog, SourceSpec, StaticSource};
pub use stages::{RemoteStage, RemoteStageConfig};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
