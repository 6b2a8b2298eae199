//! Consolidation - merge stage payloads into findings, and findings across
//! documents into common themes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::analysis::{ConsolidatedResult, Finding, StageOutcome, Synthesis, Theme};

/// Shape of the payload field a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Array of strings
    List,

    /// Object of category to string or string array
    Grouped,
}

/// Merge payload `field` of every completed stage into `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingRule {
    pub field: String,
    pub target: String,
    pub kind: FindingKind,
}

impl FindingRule {
    pub fn list(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            kind: FindingKind::List,
        }
    }

    pub fn grouped(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            kind: FindingKind::Grouped,
        }
    }
}

/// Ordered set of finding rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsolidationRules(pub Vec<FindingRule>);

impl Default for ConsolidationRules {
    /// Rules for the legal review stages.
    fn default() -> Self {
        Self(vec![
            FindingRule::list("legal_issues", "key_legal_issues"),
            FindingRule::grouped("compliance_implications", "compliance_requirements"),
            FindingRule::grouped("practical_implications", "practical_implications"),
            FindingRule::list("key_takeaways", "key_takeaways"),
            FindingRule::list("key_principles", "key_takeaways"),
            FindingRule::list("cs_action_items", "key_takeaways"),
            FindingRule::list("recommendations", "key_takeaways"),
        ])
    }
}

/// Applies consolidation rules to stage outcomes.
#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    rules: ConsolidationRules,
}

impl Consolidator {
    pub fn new(rules: ConsolidationRules) -> Self {
        Self { rules }
    }

    /// Merge completed stages' findings. Failed stages contribute nothing.
    pub fn consolidate(&self, workflow: &str, outcomes: Vec<StageOutcome>) -> ConsolidatedResult {
        let mut findings: IndexMap<String, Vec<Finding>> = IndexMap::new();

        for rule in &self.rules.0 {
            let merged = findings.entry(rule.target.clone()).or_default();
            for outcome in &outcomes {
                let Some(payload) = outcome.payload() else {
                    continue;
                };
                let items: Vec<(Option<String>, String)> = match rule.kind {
                    FindingKind::List => payload
                        .string_list(&rule.field)
                        .into_iter()
                        .map(|text| (None, text))
                        .collect(),
                    FindingKind::Grouped => payload
                        .grouped(&rule.field)
                        .into_iter()
                        .flat_map(|(category, texts)| {
                            texts.into_iter().map(move |t| (Some(category.clone()), t))
                        })
                        .collect(),
                };
                for (category, text) in items {
                    merge(merged, category, text, &outcome.stage);
                }
            }
        }
        findings.retain(|_, list| !list.is_empty());

        let confidence_by_stage = outcomes
            .iter()
            .filter_map(|o| o.signal.map(|s| (o.stage.clone(), s.value())))
            .collect();

        ConsolidatedResult {
            workflow: workflow.to_string(),
            outcomes,
            findings,
            confidence_by_stage,
        }
    }
}

fn merge(list: &mut Vec<Finding>, category: Option<String>, text: String, stage: &str) {
    let text = text.trim().to_string();
    if text.is_empty() {
        return;
    }
    match list
        .iter_mut()
        .find(|f| f.text == text && f.category == category)
    {
        Some(existing) => {
            if !existing.stages.iter().any(|s| s == stage) {
                existing.stages.push(stage.to_string());
                existing.frequency += 1;
            }
        }
        None => list.push(Finding {
            text,
            category,
            frequency: 1,
            stages: vec![stage.to_string()],
        }),
    }
}

/// Findings shared by more than one document, per target.
///
/// Themes are ranked by document count, ties keeping first-seen order, and
/// cut to `top_n`.
pub fn synthesize(results: &[ConsolidatedResult], top_n: usize) -> Synthesis {
    let mut counts: IndexMap<String, IndexMap<(Option<String>, String), usize>> = IndexMap::new();

    for result in results {
        for (target, findings) in &result.findings {
            let per_target = counts.entry(target.clone()).or_default();
            // A finding counts once per document.
            let mut seen = std::collections::HashSet::new();
            for f in findings {
                let key = (f.category.clone(), f.text.clone());
                if seen.insert(key.clone()) {
                    *per_target.entry(key).or_insert(0) += 1;
                }
            }
        }
    }

    let mut common_themes = IndexMap::new();
    for (target, per_target) in counts {
        let mut themes: Vec<Theme> = per_target
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|((category, text), documents)| Theme {
                text,
                category,
                documents,
            })
            .collect();
        // Stable sort keeps first-seen order among equal counts.
        themes.sort_by(|a, b| b.documents.cmp(&a.documents));
        themes.truncate(top_n);
        if !themes.is_empty() {
            common_themes.insert(target, themes);
        }
    }

    let scores: Vec<f64> = results.iter().filter_map(|r| r.mean_confidence()).collect();
    let mean_confidence = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    Synthesis {
        documents: results.len(),
        common_themes,
        mean_confidence,
    }
}
