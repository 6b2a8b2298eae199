//! Analysis types - stage payloads, outcomes, consolidated results, decisions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::error::StageError;
use crate::types::config::millis;

/// Structured output of one analysis stage (a JSON object).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagePayload(Map<String, Value>);

impl StagePayload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Accept a JSON value only if it is an object.
    pub fn from_value(value: Value) -> Result<Self, StageError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StageError::InvalidOutput(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Set a field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field exists and is not null.
    pub fn has_field(&self, field: &str) -> bool {
        matches!(self.0.get(field), Some(v) if !v.is_null())
    }

    /// Look up a dotted path such as `citations.cases_cited`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Self-reported confidence in [0, 1].
    ///
    /// Numbers are clamped. Labels map high=0.95, medium=0.75, low=0.50.
    pub fn confidence(&self, field: &str) -> Option<f64> {
        match self.0.get(field)? {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0)),
            Value::String(s) => confidence_label(s),
            _ => None,
        }
    }

    /// String items of an array field. Non-string items are skipped.
    pub fn string_list(&self, field: &str) -> Vec<String> {
        match self.0.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Entries of an object field whose values are strings or string arrays.
    pub fn grouped(&self, field: &str) -> Vec<(String, Vec<String>)> {
        let Some(Value::Object(groups)) = self.0.get(field) else {
            return Vec::new();
        };
        groups
            .iter()
            .map(|(category, value)| {
                let items = match value {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
                (category.clone(), items)
            })
            .collect()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn confidence_label(label: &str) -> Option<f64> {
    match label.trim().to_ascii_lowercase().as_str() {
        "high" => Some(0.95),
        "medium" => Some(0.75),
        "low" => Some(0.50),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Outputs of completed stages, in execution order. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisContext {
    entries: Vec<(String, StagePayload)>,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, stage: impl Into<String>, payload: StagePayload) {
        self.entries.push((stage.into(), payload));
    }

    /// Payload of an earlier stage.
    pub fn get(&self, stage: &str) -> Option<&StagePayload> {
        self.entries
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, payload)| payload)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StagePayload)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage name to payload, as sent to remote stages.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, payload)| (name.clone(), payload.clone().into_value()))
                .collect(),
        )
    }
}

/// Everything a stage sees when it runs.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Normalized document text
    pub text: &'a str,

    /// Optional research question
    pub query: Option<&'a str>,

    /// Outputs of stages that completed before this one
    pub context: &'a AnalysisContext,

    /// Caller-supplied context
    pub initial: &'a Map<String, Value>,
}

/// Per-stage quality signal feeding the gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QualitySignal {
    /// Confidence the stage reported about itself
    Reported(f64),

    /// Fraction of required fields present
    Completeness(f64),
}

impl QualitySignal {
    pub fn value(&self) -> f64 {
        match self {
            QualitySignal::Reported(v) | QualitySignal::Completeness(v) => *v,
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "output", rename_all = "snake_case")]
pub enum StageStatus {
    Completed(StagePayload),
    Failed(StageError),
}

/// Record of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,

    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,

    pub signal: Option<QualitySignal>,
}

impl StageOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, StageStatus::Completed(_))
    }

    pub fn payload(&self) -> Option<&StagePayload> {
        match &self.status {
            StageStatus::Completed(p) => Some(p),
            StageStatus::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.status {
            StageStatus::Failed(e) => Some(e),
            StageStatus::Completed(_) => None,
        }
    }
}

/// A merged finding with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub text: String,

    /// Category for grouped findings (the source object key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Number of stages that reported it
    pub frequency: usize,

    /// Stages that reported it, in execution order
    pub stages: Vec<String>,
}

/// Merged output of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    pub workflow: String,
    pub outcomes: Vec<StageOutcome>,

    /// Target name to merged findings
    pub findings: IndexMap<String, Vec<Finding>>,

    /// Quality signal value per stage that produced one
    pub confidence_by_stage: IndexMap<String, f64>,
}

impl ConsolidatedResult {
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    pub fn failed_stages(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_completed())
            .map(|o| o.stage.as_str())
            .collect()
    }

    /// Unweighted mean of per-stage signals.
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.confidence_by_stage.is_empty() {
            return None;
        }
        let sum: f64 = self.confidence_by_stage.values().sum();
        Some(sum / self.confidence_by_stage.len() as f64)
    }

    pub fn findings_for(&self, target: &str) -> &[Finding] {
        self.findings.get(target).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A finding shared across documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Number of documents containing it
    pub documents: usize,
}

/// Cross-document synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub documents: usize,
    pub common_themes: IndexMap<String, Vec<Theme>>,
    pub mean_confidence: Option<f64>,
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Flagged,
}

/// Letter grade for an aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    F,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.95 => QualityGrade::APlus,
            s if s >= 0.90 => QualityGrade::A,
            s if s >= 0.85 => QualityGrade::BPlus,
            s if s >= 0.80 => QualityGrade::B,
            s if s >= 0.70 => QualityGrade::C,
            _ => QualityGrade::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGrade::APlus => "A+",
            QualityGrade::A => "A",
            QualityGrade::BPlus => "B+",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::F => "F",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of gating one consolidated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub score: f64,
    pub threshold: f64,
    pub reasons: Vec<String>,

    /// Improvement advice keyed to the failures; a single "meets standards"
    /// note when nothing failed
    pub recommendations: Vec<String>,

    pub grade: QualityGrade,
    pub result: ConsolidatedResult,
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}
