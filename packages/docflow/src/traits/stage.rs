//! Analysis stage trait.

use async_trait::async_trait;

use crate::error::StageResult;
use crate::types::analysis::{StageInput, StagePayload};

/// One step of an analysis workflow.
///
/// A stage reads the document text plus the outputs of earlier stages and
/// returns a structured payload. Stages never see or mutate each other's
/// state except through the read-only context.
#[async_trait]
pub trait AnalysisStage: Send + Sync {
    /// Unique stage name, used in workflows, weights, and checks.
    fn name(&self) -> &str;

    /// Payload field holding the stage's self-reported confidence.
    fn confidence_field(&self) -> Option<&str> {
        Some("confidence_score")
    }

    /// Fields a complete payload must contain.
    fn required_fields(&self) -> &[String] {
        &[]
    }

    /// Run the stage.
    async fn run(&self, input: &StageInput<'_>) -> StageResult<StagePayload>;
}
