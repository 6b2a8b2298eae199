//! Quality gate - score a consolidated result and decide approve vs. review.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ConfigError, StoreError, StoreResult};
use crate::traits::store::DocumentStore;
use crate::types::{
    analysis::{ConsolidatedResult, Decision, QualityGrade, Verdict},
    config::GateConfig,
    document::{ReviewRecord, ReviewStatus},
};

/// Maximum characters of serialized analysis kept on a review record.
pub const REVIEW_ANALYSIS_LIMIT: usize = 10_000;

const LOW_SCORE_RECOMMENDATION: &str = "Improve content depth and analysis comprehensiveness";
const MEETS_STANDARDS: &str = "Analysis meets quality standards - continue current approach";

/// Result of one structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Pass,

    /// Check does not apply to this result
    Skipped,

    Fail(String),
}

/// A pass/fail rule on the shape of a consolidated result.
pub trait StructuralCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, result: &ConsolidatedResult) -> CheckResult;

    /// Advice attached to a decision when this check fails.
    fn recommendation(&self) -> Option<String> {
        None
    }
}

/// A stage's payload must contain every listed field.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    pub stage: String,
    pub fields: Vec<String>,
    pub recommendation: Option<String>,
}

impl RequiredFields {
    pub fn new(stage: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            stage: stage.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            recommendation: None,
        }
    }
}

impl StructuralCheck for RequiredFields {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn check(&self, result: &ConsolidatedResult) -> CheckResult {
        let Some(outcome) = result.outcome(&self.stage) else {
            return CheckResult::Skipped;
        };
        let Some(payload) = outcome.payload() else {
            return CheckResult::Fail(format!("{} did not complete", self.stage));
        };
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| !payload.has_field(f))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            CheckResult::Pass
        } else {
            CheckResult::Fail(format!(
                "{} is missing required fields: {}",
                self.stage,
                missing.join(", ")
            ))
        }
    }

    fn recommendation(&self) -> Option<String> {
        Some(self.recommendation.clone().unwrap_or_else(|| {
            format!("Ensure {} output includes {}", self.stage, self.fields.join(", "))
        }))
    }
}

/// A dotted path in a stage's payload must hold a non-empty value.
#[derive(Debug, Clone)]
pub struct NonEmptyField {
    pub stage: String,
    pub path: String,

    /// Skip when the parent object of `path` is absent
    pub only_if_parent_present: bool,

    pub recommendation: Option<String>,
}

impl NonEmptyField {
    fn parent(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }
}

impl StructuralCheck for NonEmptyField {
    fn name(&self) -> &str {
        "non_empty_field"
    }

    fn check(&self, result: &ConsolidatedResult) -> CheckResult {
        let Some(outcome) = result.outcome(&self.stage) else {
            return CheckResult::Skipped;
        };
        let Some(payload) = outcome.payload() else {
            return CheckResult::Skipped;
        };

        if self.only_if_parent_present {
            if let Some(parent) = self.parent() {
                if !matches!(payload.get_path(parent), Some(v) if !v.is_null()) {
                    return CheckResult::Skipped;
                }
            }
        }

        let empty = match payload.get_path(&self.path) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        };
        if empty {
            CheckResult::Fail(format!("{}: {} is empty", self.stage, self.path))
        } else {
            CheckResult::Pass
        }
    }

    fn recommendation(&self) -> Option<String> {
        Some(
            self.recommendation
                .clone()
                .unwrap_or_else(|| format!("Fill in {} in {} output", self.path, self.stage)),
        )
    }
}

/// Every stage of the workflow must have completed.
#[derive(Debug, Clone, Default)]
pub struct NoFailedStages;

impl StructuralCheck for NoFailedStages {
    fn name(&self) -> &str {
        "no_failed_stages"
    }

    fn check(&self, result: &ConsolidatedResult) -> CheckResult {
        let failed = result.failed_stages();
        if failed.is_empty() {
            CheckResult::Pass
        } else {
            CheckResult::Fail(format!("stages failed: {}", failed.join(", ")))
        }
    }

    fn recommendation(&self) -> Option<String> {
        Some("Rerun the failed stages before accepting the analysis".to_string())
    }
}

/// Serializable description of a structural check (config files).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSpec {
    RequiredFields {
        stage: String,
        fields: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recommendation: Option<String>,
    },
    NonEmptyField {
        stage: String,
        path: String,
        #[serde(default)]
        only_if_parent_present: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recommendation: Option<String>,
    },
    NoFailedStages,
}

impl CheckSpec {
    pub fn build(&self) -> Arc<dyn StructuralCheck> {
        match self.clone() {
            CheckSpec::RequiredFields {
                stage,
                fields,
                recommendation,
            } => Arc::new(RequiredFields {
                stage,
                fields,
                recommendation,
            }),
            CheckSpec::NonEmptyField {
                stage,
                path,
                only_if_parent_present,
                recommendation,
            } => Arc::new(NonEmptyField {
                stage,
                path,
                only_if_parent_present,
                recommendation,
            }),
            CheckSpec::NoFailedStages => Arc::new(NoFailedStages),
        }
    }
}

/// Structural checks for the legal review stages.
pub fn legal_review_checks() -> Vec<CheckSpec> {
    let fields = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
    let advice = |text: &str| Some(text.to_string());
    vec![
        CheckSpec::RequiredFields {
            stage: "legal_analyst".into(),
            fields: fields(&["case_summary", "legal_issues", "court_reasoning", "precedent_analysis"]),
            recommendation: advice(
                "Ensure legal analysis includes case summary, legal issues, reasoning, and precedent analysis",
            ),
        },
        CheckSpec::RequiredFields {
            stage: "cs_expert".into(),
            fields: fields(&[
                "executive_summary",
                "compliance_implications",
                "practical_guidance",
                "cs_action_items",
            ]),
            recommendation: advice(
                "Include executive summary, compliance implications, practical guidance, and action items",
            ),
        },
        CheckSpec::NonEmptyField {
            stage: "legal_analyst".into(),
            path: "citations_analysis.cases_cited".into(),
            only_if_parent_present: true,
            recommendation: advice("Add relevant case citations and legal authorities"),
        },
        CheckSpec::NonEmptyField {
            stage: "legal_analyst".into(),
            path: "citations_analysis.distinguishing_factors".into(),
            only_if_parent_present: true,
            recommendation: advice("Add relevant case citations and legal authorities"),
        },
    ]
}

/// Scores consolidated results and routes flagged ones to review.
#[derive(Clone)]
pub struct QualityGate {
    config: GateConfig,
    checks: Vec<Arc<dyn StructuralCheck>>,
}

impl QualityGate {
    /// Create a gate. Fails if the weights or threshold are invalid.
    pub fn new(config: GateConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            checks: Vec::new(),
        })
    }

    pub fn with_check(mut self, check: Arc<dyn StructuralCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_checks(mut self, specs: &[CheckSpec]) -> Self {
        self.checks.extend(specs.iter().map(CheckSpec::build));
        self
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Weighted mean of per-stage signals, renormalized over usable stages.
    pub fn score(&self, result: &ConsolidatedResult) -> f64 {
        let signals = result
            .outcomes
            .iter()
            .filter(|o| o.is_completed())
            .filter_map(|o| o.signal.map(|s| (o.stage.as_str(), s.value())));

        let (weighted, total) = if self.config.weights.is_empty() {
            signals.fold((0.0, 0.0), |(sum, n), (_, v)| (sum + v, n + 1.0))
        } else {
            signals
                .filter_map(|(stage, v)| self.config.weights.get(stage).map(|w| (*w, v)))
                .fold((0.0, 0.0), |(sum, wsum), (w, v)| (sum + w * v, wsum + w))
        };

        if total > 0.0 {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Score, run every check, and decide.
    pub fn evaluate(&self, result: &ConsolidatedResult) -> Decision {
        let score = self.score(result);
        let threshold = self.config.threshold;
        let mut reasons = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();

        if score < threshold {
            reasons.push(format!(
                "quality score {:.3} below threshold {:.3}",
                score, threshold
            ));
            recommendations.push(LOW_SCORE_RECOMMENDATION.to_string());
        }
        for check in &self.checks {
            if let CheckResult::Fail(reason) = check.check(result) {
                reasons.push(format!("{}: {}", check.name(), reason));
                if let Some(advice) = check.recommendation() {
                    if !recommendations.contains(&advice) {
                        recommendations.push(advice);
                    }
                }
            }
        }
        if recommendations.is_empty() {
            recommendations.push(MEETS_STANDARDS.to_string());
        }

        let verdict = if reasons.is_empty() {
            Verdict::Approved
        } else {
            Verdict::Flagged
        };
        info!(
            workflow = %result.workflow,
            score,
            verdict = ?verdict,
            reasons = reasons.len(),
            "quality gate evaluated"
        );

        Decision {
            verdict,
            score,
            threshold,
            reasons,
            recommendations,
            grade: QualityGrade::from_score(score),
            result: result.clone(),
        }
    }

    /// Persist a review record for a flagged decision.
    ///
    /// Returns the review id, or `None` for approved decisions.
    pub async fn route(
        &self,
        document_id: Uuid,
        decision: &Decision,
        store: &dyn DocumentStore,
    ) -> StoreResult<Option<Uuid>> {
        if decision.verdict == Verdict::Approved {
            return Ok(None);
        }

        let analysis = serde_json::to_string(&decision.result)
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        let review = ReviewRecord {
            id: Uuid::new_v4(),
            document_id,
            score: decision.score,
            threshold: decision.threshold,
            reasons: decision.reasons.clone(),
            recommendations: decision.recommendations.clone(),
            analysis: truncate_chars(&analysis, REVIEW_ANALYSIS_LIMIT),
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
        };

        let id = store.save_review(review).await?;
        warn!(document_id = %document_id, review_id = %id, "analysis flagged for review");
        Ok(Some(id))
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::types::analysis::{QualitySignal, StageOutcome, StagePayload, StageStatus};
    use indexmap::IndexMap;
    use serde_json::json;
    use std::time::Duration;

    fn outcome(stage: &str, payload: Value, signal: Option<f64>) -> StageOutcome {
        StageOutcome {
            stage: stage.into(),
            status: StageStatus::Completed(StagePayload::from_value(payload).unwrap()),
            duration: Duration::from_millis(5),
            signal: signal.map(QualitySignal::Reported),
        }
    }

    fn failed(stage: &str) -> StageOutcome {
        StageOutcome {
            stage: stage.into(),
            status: StageStatus::Failed(StageError::Timeout(1000)),
            duration: Duration::from_secs(1),
            signal: None,
        }
    }

    fn result(outcomes: Vec<StageOutcome>) -> ConsolidatedResult {
        let confidence_by_stage = outcomes
            .iter()
            .filter_map(|o| o.signal.map(|s| (o.stage.clone(), s.value())))
            .collect();
        ConsolidatedResult {
            workflow: "comprehensive".into(),
            outcomes,
            findings: IndexMap::new(),
            confidence_by_stage,
        }
    }

    fn weighted() -> GateConfig {
        GateConfig::default()
            .with_weight("legal_analyst", 0.3)
            .with_weight("cs_expert", 0.3)
            .with_weight("quality_reviewer", 0.4)
    }

    #[test]
    fn test_equal_weights_when_table_empty() {
        let gate = QualityGate::new(GateConfig::default()).unwrap();
        let r = result(vec![
            outcome("a", json!({}), Some(1.0)),
            outcome("b", json!({}), Some(0.8)),
            outcome("c", json!({}), None),
        ]);
        assert!((gate.score(&r) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_weights_renormalize_over_usable_stages() {
        let gate = QualityGate::new(weighted()).unwrap();
        let r = result(vec![
            outcome("legal_analyst", json!({}), Some(0.9)),
            failed("cs_expert"),
            outcome("quality_reviewer", json!({}), Some(0.8)),
            outcome("unweighted", json!({}), Some(0.0)),
        ]);

        // (0.3 * 0.9 + 0.4 * 0.8) / 0.7
        let expected = (0.27 + 0.32) / 0.7;
        assert!((gate.score(&r) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_no_signal_scores_zero() {
        let gate = QualityGate::new(weighted()).unwrap();
        let r = result(vec![failed("legal_analyst")]);
        assert_eq!(gate.score(&r), 0.0);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let config = GateConfig::default().with_weight("a", 0.4);
        assert!(matches!(
            QualityGate::new(config),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_approve_and_flag_by_score() {
        let gate = QualityGate::new(GateConfig::default()).unwrap();

        let high = gate.evaluate(&result(vec![outcome("a", json!({}), Some(0.97))]));
        assert_eq!(high.verdict, Verdict::Approved);
        assert_eq!(high.grade, QualityGrade::APlus);
        assert!(high.reasons.is_empty());
        assert_eq!(high.recommendations, vec![MEETS_STANDARDS]);

        let low = gate.evaluate(&result(vec![outcome("a", json!({}), Some(0.80))]));
        assert_eq!(low.verdict, Verdict::Flagged);
        assert_eq!(low.grade, QualityGrade::B);
        assert!(low.reasons[0].contains("below threshold"));
        assert_eq!(low.recommendations, vec![LOW_SCORE_RECOMMENDATION]);
    }

    #[test]
    fn test_structural_check_flags_high_score() {
        let gate = QualityGate::new(GateConfig::default())
            .unwrap()
            .with_checks(&legal_review_checks());
        let r = result(vec![outcome(
            "legal_analyst",
            json!({
                "case_summary": "s",
                "legal_issues": ["x"],
                "court_reasoning": "r",
                "precedent_analysis": "p",
                "citations_analysis": { "cases_cited": [], "distinguishing_factors": ["d"] }
            }),
            Some(0.99),
        )]);

        let decision = gate.evaluate(&r);

        assert_eq!(decision.verdict, Verdict::Flagged);
        assert_eq!(decision.reasons.len(), 1);
        assert!(decision.reasons[0].contains("cases_cited"));
        assert_eq!(
            decision.recommendations,
            vec!["Add relevant case citations and legal authorities"]
        );
    }

    #[test]
    fn test_recommendations_follow_failed_checks() {
        let gate = QualityGate::new(GateConfig::default())
            .unwrap()
            .with_checks(&legal_review_checks())
            .with_check(Arc::new(RequiredFields::new("quality_reviewer", &["overall_quality_score"])));
        let r = result(vec![
            outcome(
                "legal_analyst",
                json!({
                    "case_summary": "s",
                    "citations_analysis": { "cases_cited": [], "distinguishing_factors": [] }
                }),
                Some(0.6),
            ),
            failed("quality_reviewer"),
        ]);

        let decision = gate.evaluate(&r);

        // Score first, then each failing check once, in check order.
        assert_eq!(
            decision.recommendations,
            vec![
                LOW_SCORE_RECOMMENDATION.to_string(),
                "Ensure legal analysis includes case summary, legal issues, reasoning, and precedent analysis".to_string(),
                "Add relevant case citations and legal authorities".to_string(),
                "Ensure quality_reviewer output includes overall_quality_score".to_string(),
            ]
        );
    }

    #[test]
    fn test_checks_skip_absent_stage_and_parent() {
        let gate = QualityGate::new(GateConfig::default())
            .unwrap()
            .with_checks(&legal_review_checks());
        // No cs_expert stage and no citations_analysis object.
        let r = result(vec![outcome(
            "legal_analyst",
            json!({
                "case_summary": "s",
                "legal_issues": ["x"],
                "court_reasoning": "r",
                "precedent_analysis": "p"
            }),
            Some(0.99),
        )]);

        assert_eq!(gate.evaluate(&r).verdict, Verdict::Approved);
    }

    #[test]
    fn test_required_fields_fail_on_errored_stage() {
        let check = RequiredFields::new("cs_expert", &["executive_summary"]);
        let r = result(vec![failed("cs_expert")]);
        assert!(matches!(check.check(&r), CheckResult::Fail(_)));
    }

    #[test]
    fn test_no_failed_stages_check() {
        let gate = QualityGate::new(GateConfig::default())
            .unwrap()
            .with_check(Arc::new(NoFailedStages));
        let r = result(vec![
            outcome("a", json!({}), Some(1.0)),
            failed("b"),
        ]);

        let decision = gate.evaluate(&r);
        assert_eq!(decision.verdict, Verdict::Flagged);
        assert_eq!(decision.reasons, vec!["no_failed_stages: stages failed: b"]);
    }

    #[test]
    fn test_check_spec_from_json() {
        let specs: Vec<CheckSpec> = serde_json::from_str(
            r#"[
                {"type": "required_fields", "stage": "s", "fields": ["a"]},
                {"type": "non_empty_field", "stage": "s", "path": "x.y"},
                {"type": "no_failed_stages"}
            ]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 3);
        assert!(matches!(
            specs[1],
            CheckSpec::NonEmptyField { only_if_parent_present: false, .. }
        ));
    }

    #[test]
    fn test_truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
