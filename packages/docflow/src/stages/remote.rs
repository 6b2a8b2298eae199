//! HTTP-backed analysis stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{StageError, StageResult};
use crate::traits::stage::AnalysisStage;
use crate::types::analysis::{StageInput, StagePayload};

fn default_confidence_field() -> Option<String> {
    Some("confidence_score".to_string())
}

/// Declaration of a remote stage (config files).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStageConfig {
    pub name: String,

    /// URL the stage request is POSTed to
    pub endpoint: String,

    /// Sent as a bearer token when set
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_confidence_field")]
    pub confidence_field: Option<String>,

    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl RemoteStageConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: None,
            confidence_field: default_confidence_field(),
            required_fields: Vec::new(),
        }
    }
}

/// A stage served over HTTP.
///
/// The request body is `{stage, text, query, context, initial}` where
/// `context` maps earlier stage names to their payloads. The response must be
/// a JSON object; it becomes the stage payload.
#[derive(Clone)]
pub struct RemoteStage {
    config: RemoteStageConfig,
    http_client: reqwest::Client,
}

impl RemoteStage {
    pub fn new(config: RemoteStageConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    fn request_body(&self, input: &StageInput<'_>) -> Value {
        json!({
            "stage": self.config.name,
            "text": input.text,
            "query": input.query,
            "context": input.context.to_json(),
            "initial": input.initial,
        })
    }
}

#[async_trait]
impl AnalysisStage for RemoteStage {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn confidence_field(&self) -> Option<&str> {
        self.config.confidence_field.as_deref()
    }

    fn required_fields(&self) -> &[String] {
        &self.config.required_fields
    }

    async fn run(&self, input: &StageInput<'_>) -> StageResult<StagePayload> {
        debug!(stage = %self.config.name, endpoint = %self.config.endpoint, "calling remote stage");

        let mut request = self
            .http_client
            .post(&self.config.endpoint)
            .json(&self.request_body(input));
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StageError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StageError::Failed(format!(
                "{} returned {}: {}",
                self.config.name,
                status.as_u16(),
                error_text.chars().take(200).collect::<String>()
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| StageError::InvalidOutput(e.to_string()))?;
        StagePayload::from_value(value)
    }
}
