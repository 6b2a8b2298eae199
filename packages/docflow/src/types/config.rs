//! Configuration types for fetching, ingestion, analysis, and runs.
//!
//! All types deserialize from the JSON config file. Durations are written as
//! milliseconds (`*_ms` keys).

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::document::Candidate;

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}

/// Politeness and retry policy for fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Minimum spacing between request starts to one origin
    #[serde(rename = "min_interval_ms", with = "millis")]
    pub min_interval: Duration,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Backoff before retry n is `base_backoff * 2^n`
    #[serde(rename = "base_backoff_ms", with = "millis")]
    pub base_backoff: Duration,

    /// Upper bound for any single backoff sleep
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,

    /// Per-attempt timeout
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,

    /// Honour robots.txt
    pub respect_robots: bool,

    /// User-Agent sent with each request
    pub user_agent: String,

    /// Optional cap on requests per second across all origins
    pub global_rps: Option<u32>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(800),
            max_retries: 3,
            base_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            respect_robots: true,
            user_agent: concat!("docflow/", env!("CARGO_PKG_VERSION")).to_string(),
            global_rps: None,
        }
    }
}

impl FetchPolicy {
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn with_global_rps(mut self, rps: u32) -> Self {
        self.global_rps = Some(rps);
        self
    }

    /// Backoff before retrying after 0-based attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Documents in flight at once
    pub concurrency: usize,

    /// Normalized text shorter than this is rejected
    pub min_text_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            min_text_chars: 200,
        }
    }
}

impl IngestConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_min_text_chars(mut self, min: usize) -> Self {
        self.min_text_chars = min;
        self
    }
}

/// Analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Documents analyzed at once
    pub concurrency: usize,

    /// Timeout for one stage invocation
    #[serde(rename = "stage_timeout_ms", with = "millis")]
    pub stage_timeout: Duration,

    /// Workflow to run; unknown names fall back to the registry default
    pub workflow: String,

    /// Optional research question passed to every stage
    pub query: Option<String>,

    /// Common themes reported by bulk synthesis
    pub synthesis_top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            stage_timeout: Duration::from_secs(120),
            workflow: "comprehensive".to_string(),
            query: None,
            synthesis_top_n: 5,
        }
    }
}

impl AnalysisConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = workflow.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Quality gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum aggregate score for approval
    pub threshold: f64,

    /// Stage name to weight. Empty means equal weights.
    pub weights: IndexMap<String, f64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            weights: IndexMap::new(),
        }
    }
}

impl GateConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_weight(mut self, stage: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(stage.into(), weight);
        self
    }

    /// Check threshold range and weight table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "threshold".into(),
                reason: format!("{} is outside [0, 1]", self.threshold),
            });
        }
        if self.weights.is_empty() {
            return Ok(());
        }
        if let Some((stage, w)) = self.weights.iter().find(|(_, w)| w.is_nan() || **w <= 0.0) {
            return Err(ConfigError::InvalidWeights(format!(
                "weight for {} must be positive, got {}",
                stage, w
            )));
        }
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidWeights(format!(
                "weights sum to {}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }
}

/// Discovery window applied to every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryWindow {
    /// Drop dated candidates older than this many days
    pub lookback_days: u32,

    /// Upper bound on candidates per source
    pub max_candidates: usize,
}

impl Default for DiscoveryWindow {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            max_candidates: 100,
        }
    }
}

impl DiscoveryWindow {
    pub fn new(lookback_days: u32, max_candidates: usize) -> Self {
        Self {
            lookback_days,
            max_candidates,
        }
    }

    /// Earliest declared date still inside the window.
    pub fn cutoff(&self) -> NaiveDate {
        (Utc::now() - ChronoDuration::days(i64::from(self.lookback_days))).date_naive()
    }

    /// Whether a declared date falls inside the window. Undated is inside.
    pub fn admits(&self, declared: Option<NaiveDate>) -> bool {
        declared.map_or(true, |d| d >= self.cutoff())
    }

    /// Drop candidates dated before the cutoff, then truncate.
    pub fn apply(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| self.admits(c.declared_date))
            .take(self.max_candidates)
            .collect()
    }
}

/// Whole-run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    pub window: DiscoveryWindow,
    pub fetch: FetchPolicy,
    pub ingest: IngestConfig,
    pub analysis: AnalysisConfig,
    pub gate: GateConfig,

    /// Cancel the run after this long
    #[serde(rename = "deadline_ms", with = "opt_millis")]
    pub deadline: Option<Duration>,
}

impl RunConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = FetchPolicy::default()
            .with_base_backoff(Duration::from_secs(3))
            .with_max_backoff(Duration::from_secs(20));

        assert_eq!(policy.backoff_for(0), Duration::from_secs(3));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(6));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(12));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(20));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(20));
    }

    #[test]
    fn test_gate_weights_must_sum_to_one() {
        let ok = GateConfig::default()
            .with_weight("legal_analyst", 0.3)
            .with_weight("cs_expert", 0.3)
            .with_weight("quality_reviewer", 0.4);
        assert!(ok.validate().is_ok());

        let bad = GateConfig::default()
            .with_weight("a", 0.5)
            .with_weight("b", 0.6);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidWeights(_))));

        let negative = GateConfig::default()
            .with_weight("a", 1.5)
            .with_weight("b", -0.5);
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_threshold_range() {
        assert!(GateConfig::default().with_threshold(1.2).validate().is_err());
        assert!(GateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_window_admits_undated_and_recent() {
        let window = DiscoveryWindow::new(10, 5);
        let today = Utc::now().date_naive();

        assert!(window.admits(None));
        assert!(window.admits(Some(today)));
        assert!(!window.admits(Some(today - ChronoDuration::days(30))));
    }

    #[test]
    fn test_window_apply_filters_then_truncates() {
        let window = DiscoveryWindow::new(10, 2);
        let today = Utc::now().date_naive();
        let candidates = vec![
            Candidate::new("old", "s").with_declared_date(today - ChronoDuration::days(40)),
            Candidate::new("undated", "s"),
            Candidate::new("recent", "s").with_declared_date(today),
            Candidate::new("extra", "s"),
        ];

        let kept: Vec<_> = window
            .apply(candidates)
            .into_iter()
            .map(|c| c.locator)
            .collect();
        assert_eq!(kept, vec!["undated", "recent"]);
    }

    #[test]
    fn test_run_config_from_json() {
        let json = r#"{
            "fetch": { "min_interval_ms": 250, "max_retries": 1 },
            "gate": { "threshold": 0.9 },
            "deadline_ms": 60000
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.fetch.min_interval, Duration::from_millis(250));
        assert_eq!(config.fetch.max_retries, 1);
        assert_eq!(config.fetch.base_backoff, Duration::from_secs(3));
        assert_eq!(config.gate.threshold, 0.9);
        assert_eq!(config.ingest.concurrency, 5);
        assert_eq!(config.deadline, Some(Duration::from_secs(60)));
    }
}
