//! Pipelines - the core of the library.
//!
//! - Ingestion (fetch → extract → dedup → store)
//! - Staged analysis with context passing
//! - Consolidation and bulk synthesis
//! - Quality gate and review routing
//! - Full runs under a shared cancellation token

pub mod analyze;
pub mod consolidate;
pub mod gate;
pub mod ingest;
pub mod orchestrator;
pub mod run;

pub use analyze::{AnalysisOutcome, AnalysisReport, AnalysisRunner, DocumentAnalysis};
pub use consolidate::{synthesize, ConsolidationRules, Consolidator, FindingKind, FindingRule};
pub use gate::{
    legal_review_checks, CheckResult, CheckSpec, NoFailedStages, NonEmptyField, QualityGate,
    RequiredFields, StructuralCheck,
};
pub use ingest::{CandidateOutcome, DuplicateKind, IngestReport, IngestionPipeline, Outcome};
pub use orchestrator::{
    quality_signal, standard_workflows, StageOrchestrator, StagePreference, Workflow,
    WorkflowRegistry,
};
pub use run::{Run, RunReport, SourceFailure};
