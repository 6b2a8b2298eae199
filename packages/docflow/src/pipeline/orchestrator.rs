//! Stage orchestration - run a workflow's stages in order over one document.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, StageError};
use crate::pipeline::consolidate::{ConsolidationRules, Consolidator};
use crate::traits::stage::AnalysisStage;
use crate::types::analysis::{
    AnalysisContext, ConsolidatedResult, QualitySignal, StageInput, StageOutcome, StagePayload,
    StageStatus,
};

/// A named, ordered list of stages.
#[derive(Clone)]
pub struct Workflow {
    name: String,
    stages: Vec<Arc<dyn AnalysisStage>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn AnalysisStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Arc<dyn AnalysisStage>] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Stage orderings used for legal document review.
pub fn standard_workflows() -> IndexMap<String, Vec<String>> {
    let define = |stages: &[&str]| stages.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    IndexMap::from([
        (
            "comprehensive".to_string(),
            define(&["legal_analyst", "cs_expert", "quality_reviewer"]),
        ),
        (
            "cs_focused".to_string(),
            define(&["cs_expert", "legal_analyst", "quality_reviewer"]),
        ),
        (
            "legal_focused".to_string(),
            define(&["legal_analyst", "quality_reviewer"]),
        ),
        (
            "quick_review".to_string(),
            define(&["cs_expert", "quality_reviewer"]),
        ),
    ])
}

const LEGAL_KEYWORDS: &[&str] = &[
    "precedent",
    "case law",
    "judgment",
    "legal reasoning",
    "statute",
    "interpretation",
    "court",
    "appeal",
    "constitutional",
];

const CS_KEYWORDS: &[&str] = &[
    "compliance",
    "corporate governance",
    "board",
    "filing",
    "regulatory",
    "company secretary",
    "agm",
    "egm",
    "disclosure",
    "procedure",
];

/// Which stages a research question should go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagePreference {
    /// Pick by the legal and company-secretarial keywords in the query
    #[default]
    Auto,
    Legal,
    Cs,
    All,
}

impl FromStr for StagePreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "legal" => Ok(Self::Legal),
            "cs" => Ok(Self::Cs),
            "all" => Ok(Self::All),
            other => Err(ConfigError::InvalidValue {
                field: "stage_preference".into(),
                reason: format!("expected auto, legal, cs or all, got {}", other),
            }),
        }
    }
}

impl StagePreference {
    /// Workflow name for this preference and query.
    ///
    /// `Auto` compares keyword hits. Ties, including a query with no hits,
    /// go to the comprehensive workflow.
    pub fn workflow_for(self, query: &str) -> &'static str {
        match self {
            Self::Legal => "legal_focused",
            Self::Cs => "cs_focused",
            Self::All => "comprehensive",
            Self::Auto => {
                let query = query.to_lowercase();
                let hits = |keywords: &[&str]| keywords.iter().filter(|k| query.contains(*k)).count();
                let (legal, cs) = (hits(LEGAL_KEYWORDS), hits(CS_KEYWORDS));
                match legal.cmp(&cs) {
                    Ordering::Greater => "legal_focused",
                    Ordering::Less => "cs_focused",
                    Ordering::Equal => "comprehensive",
                }
            }
        }
    }
}

/// Named workflows with a fallback for unknown names.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    workflows: IndexMap<String, Workflow>,
    default: String,
}

impl WorkflowRegistry {
    /// Build workflows from stage names.
    ///
    /// Fails if a workflow names an unregistered stage or the default
    /// workflow is not defined.
    pub fn from_names(
        stages: &IndexMap<String, Arc<dyn AnalysisStage>>,
        definitions: &IndexMap<String, Vec<String>>,
        default: &str,
    ) -> Result<Self, ConfigError> {
        let mut workflows = IndexMap::new();
        for (name, stage_names) in definitions {
            let mut workflow = Workflow::new(name.clone());
            for stage_name in stage_names {
                let stage = stages
                    .get(stage_name)
                    .ok_or_else(|| ConfigError::UnknownStage(stage_name.clone()))?;
                workflow = workflow.with_stage(Arc::clone(stage));
            }
            workflows.insert(name.clone(), workflow);
        }
        Self::new(workflows.into_values().collect(), default)
    }

    pub fn new(workflows: Vec<Workflow>, default: &str) -> Result<Self, ConfigError> {
        let workflows: IndexMap<String, Workflow> = workflows
            .into_iter()
            .map(|w| (w.name.clone(), w))
            .collect();
        if !workflows.contains_key(default) {
            return Err(ConfigError::InvalidValue {
                field: "default_workflow".into(),
                reason: format!("workflow {} is not defined", default),
            });
        }
        Ok(Self {
            workflows,
            default: default.to_string(),
        })
    }

    /// Workflow by name, or the default for unknown names.
    pub fn resolve(&self, name: &str) -> &Workflow {
        match self.workflows.get(name) {
            Some(workflow) => workflow,
            None => {
                warn!(requested = %name, fallback = %self.default, "unknown workflow, using default");
                &self.workflows[self.default.as_str()]
            }
        }
    }

    /// Workflow chosen for a research question.
    ///
    /// Falls back to the default when the chosen workflow is not defined.
    pub fn select_for_query(&self, query: Option<&str>, preference: StagePreference) -> &Workflow {
        let name = preference.workflow_for(query.unwrap_or_default());
        debug!(?preference, workflow = %name, "selected workflow for query");
        self.resolve(name)
    }

    /// Resolve a configured workflow setting.
    ///
    /// `auto`, `legal`, `cs` and `all` select by query; anything else is a
    /// workflow name.
    pub fn for_analysis(&self, workflow: &str, query: Option<&str>) -> &Workflow {
        match workflow.parse::<StagePreference>() {
            Ok(preference) => self.select_for_query(query, preference),
            Err(_) => self.resolve(workflow),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }
}

/// Runs workflows and consolidates their output.
#[derive(Clone)]
pub struct StageOrchestrator {
    stage_timeout: Duration,
    consolidator: Consolidator,
    cancel: CancellationToken,
}

impl Default for StageOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl StageOrchestrator {
    pub fn new() -> Self {
        Self {
            stage_timeout: Duration::from_secs(120),
            consolidator: Consolidator::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_rules(mut self, rules: ConsolidationRules) -> Self {
        self.consolidator = Consolidator::new(rules);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run every stage of `workflow` over `text`, in order.
    ///
    /// A failing stage is recorded and skipped; it never stops later stages.
    /// Only cancellation ends the run early.
    pub async fn analyze(
        &self,
        text: &str,
        workflow: &Workflow,
        query: Option<&str>,
        initial: &Map<String, Value>,
    ) -> ConsolidatedResult {
        info!(workflow = %workflow.name(), stages = workflow.stages().len(), "analysis starting");

        let mut context = AnalysisContext::new();
        let mut outcomes = Vec::with_capacity(workflow.stages().len());

        for stage in workflow.stages() {
            let name = stage.name().to_string();

            if self.cancel.is_cancelled() {
                outcomes.push(StageOutcome {
                    stage: name,
                    status: StageStatus::Failed(StageError::Cancelled),
                    duration: Duration::ZERO,
                    signal: None,
                });
                continue;
            }

            let input = StageInput {
                text,
                query,
                context: &context,
                initial,
            };
            let started = Instant::now();
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(StageError::Cancelled),
                r = tokio::time::timeout(self.stage_timeout, stage.run(&input)) => match r {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Timeout(self.stage_timeout.as_millis() as u64)),
                },
            };
            let duration = started.elapsed();

            let outcome = match result {
                Ok(payload) => {
                    let signal = quality_signal(stage.as_ref(), &payload);
                    debug!(stage = %name, duration_ms = duration.as_millis() as u64, "stage completed");
                    context.push(name.clone(), payload.clone());
                    StageOutcome {
                        stage: name,
                        status: StageStatus::Completed(payload),
                        duration,
                        signal,
                    }
                }
                Err(error) => {
                    warn!(stage = %name, error = %error, "stage failed");
                    StageOutcome {
                        stage: name,
                        status: StageStatus::Failed(error),
                        duration,
                        signal: None,
                    }
                }
            };
            outcomes.push(outcome);
        }

        self.consolidator.consolidate(workflow.name(), outcomes)
    }
}

/// Reported confidence if present, else completeness over required fields.
pub fn quality_signal(stage: &dyn AnalysisStage, payload: &StagePayload) -> Option<QualitySignal> {
    if let Some(v) = stage.confidence_field().and_then(|f| payload.confidence(f)) {
        return Some(QualitySignal::Reported(v));
    }
    let required = stage.required_fields();
    if required.is_empty() {
        return None;
    }
    let present = required.iter().filter(|f| payload.has_field(f)).count();
    Some(QualitySignal::Completeness(present as f64 / required.len() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStage;

    fn payload(confidence: f64) -> StagePayload {
        StagePayload::default().with("confidence_score", confidence)
    }

    async fn run(orchestrator: &StageOrchestrator, workflow: &Workflow) -> ConsolidatedResult {
        orchestrator
            .analyze("document text", workflow, Some("what changed?"), &Map::new())
            .await
    }

    #[tokio::test]
    async fn test_stages_run_in_order_with_context() {
        let first = ScriptedStage::new("first").returning(payload(0.9));
        let second = ScriptedStage::new("second").returning(payload(0.8));
        let workflow = Workflow::new("w")
            .with_stage(Arc::new(first.clone()))
            .with_stage(Arc::new(second.clone()));

        let result = run(&StageOrchestrator::new(), &workflow).await;

        assert_eq!(result.outcomes.len(), 2);
        assert!(first.calls()[0].context_stages.is_empty());
        assert_eq!(second.calls()[0].context_stages, vec!["first"]);
        assert_eq!(second.calls()[0].query.as_deref(), Some("what changed?"));
        assert_eq!(
            result.outcomes[0].signal,
            Some(QualitySignal::Reported(0.9))
        );
    }

    #[tokio::test]
    async fn test_failed_stage_is_isolated() {
        let a = ScriptedStage::new("a").returning(payload(0.9));
        let b = ScriptedStage::new("b").failing(StageError::Failed("backend down".into()));
        let c = ScriptedStage::new("c").returning(payload(0.7));
        let workflow = Workflow::new("w")
            .with_stage(Arc::new(a))
            .with_stage(Arc::new(b))
            .with_stage(Arc::new(c.clone()));

        let result = run(&StageOrchestrator::new(), &workflow).await;

        assert!(result.outcomes[0].is_completed());
        assert_eq!(
            result.outcomes[1].error(),
            Some(&StageError::Failed("backend down".into()))
        );
        assert!(result.outcomes[2].is_completed());
        // The failed stage contributes nothing to later context.
        assert_eq!(c.calls()[0].context_stages, vec!["a"]);
        assert_eq!(result.failed_stages(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_is_isolated() {
        let slow = ScriptedStage::new("slow")
            .returning(payload(0.9))
            .with_delay(Duration::from_secs(10));
        let fast = ScriptedStage::new("fast").returning(payload(0.9));
        let workflow = Workflow::new("w")
            .with_stage(Arc::new(slow))
            .with_stage(Arc::new(fast));

        let orchestrator = StageOrchestrator::new().with_stage_timeout(Duration::from_secs(2));
        let result = run(&orchestrator, &workflow).await;

        assert_eq!(result.outcomes[0].error(), Some(&StageError::Timeout(2000)));
        assert!(result.outcomes[1].is_completed());
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_remaining_stages() {
        let token = CancellationToken::new();
        token.cancel();
        let workflow = Workflow::new("w")
            .with_stage(Arc::new(ScriptedStage::new("a")))
            .with_stage(Arc::new(ScriptedStage::new("b")));

        let result = run(&StageOrchestrator::new().with_cancellation(token), &workflow).await;

        assert!(result
            .outcomes
            .iter()
            .all(|o| o.error() == Some(&StageError::Cancelled)));
    }

    #[test]
    fn test_quality_signal_falls_back_to_completeness() {
        let stage = ScriptedStage::new("s")
            .with_confidence_field(None)
            .with_required_fields(&["summary", "issues", "holding", "reasoning"]);
        let p = StagePayload::default()
            .with("summary", "x")
            .with("issues", Value::Array(vec![]))
            .with("holding", Value::Null);

        assert_eq!(quality_signal(&stage, &p), Some(QualitySignal::Completeness(0.5)));

        let bare = ScriptedStage::new("bare").with_confidence_field(None);
        assert_eq!(quality_signal(&bare, &p), None);
    }

    #[test]
    fn test_registry_falls_back_to_default() {
        let mut stages: IndexMap<String, Arc<dyn AnalysisStage>> = IndexMap::new();
        for name in ["legal_analyst", "cs_expert", "quality_reviewer"] {
            stages.insert(name.to_string(), Arc::new(ScriptedStage::new(name)));
        }

        let registry =
            WorkflowRegistry::from_names(&stages, &standard_workflows(), "comprehensive").unwrap();

        assert_eq!(
            registry.resolve("quick_review").stage_names(),
            vec!["cs_expert", "quality_reviewer"]
        );
        assert_eq!(registry.resolve("nonexistent").name(), "comprehensive");
    }

    fn standard_registry() -> WorkflowRegistry {
        let mut stages: IndexMap<String, Arc<dyn AnalysisStage>> = IndexMap::new();
        for name in ["legal_analyst", "cs_expert", "quality_reviewer"] {
            stages.insert(name.to_string(), Arc::new(ScriptedStage::new(name)));
        }
        WorkflowRegistry::from_names(&stages, &standard_workflows(), "comprehensive").unwrap()
    }

    #[test]
    fn test_auto_selection_by_keywords() {
        let registry = standard_registry();
        let select = |query| registry.select_for_query(Some(query), StagePreference::Auto).name();

        assert_eq!(select("Which precedent did the Court of Appeal follow?"), "legal_focused");
        assert_eq!(select("What board filing and AGM compliance steps follow?"), "cs_focused");
        assert_eq!(select("Does the court ruling change board duties?"), "comprehensive");
        assert_eq!(select("Summarize this order"), "comprehensive");
        assert_eq!(registry.select_for_query(None, StagePreference::Auto).name(), "comprehensive");
    }

    #[test]
    fn test_explicit_preferences_ignore_query() {
        let registry = standard_registry();
        let query = Some("statute interpretation on appeal");

        assert_eq!(
            registry.select_for_query(query, StagePreference::Cs).stage_names(),
            vec!["cs_expert", "legal_analyst", "quality_reviewer"]
        );
        assert_eq!(
            registry.select_for_query(query, StagePreference::Legal).stage_names(),
            vec!["legal_analyst", "quality_reviewer"]
        );
        assert_eq!(registry.select_for_query(query, StagePreference::All).name(), "comprehensive");
    }

    #[test]
    fn test_for_analysis_parses_preferences() {
        let registry = standard_registry();

        assert_eq!(registry.for_analysis("AUTO", Some("AGM disclosure")).name(), "cs_focused");
        assert_eq!(registry.for_analysis("legal", None).name(), "legal_focused");
        assert_eq!(registry.for_analysis("quick_review", Some("precedent")).name(), "quick_review");
        assert!("sometimes".parse::<StagePreference>().is_err());
    }

    #[test]
    fn test_selection_falls_back_when_workflow_missing() {
        let registry = WorkflowRegistry::new(
            vec![Workflow::new("comprehensive").with_stage(Arc::new(ScriptedStage::new("only")))],
            "comprehensive",
        )
        .unwrap();

        let chosen = registry.select_for_query(Some("case law"), StagePreference::Auto);

        assert_eq!(chosen.name(), "comprehensive");
    }

    #[test]
    fn test_registry_rejects_unknown_stage() {
        let stages: IndexMap<String, Arc<dyn AnalysisStage>> = IndexMap::new();
        let err = WorkflowRegistry::from_names(&stages, &standard_workflows(), "comprehensive")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage(_)));
    }
}
