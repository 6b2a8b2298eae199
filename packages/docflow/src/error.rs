//! Typed errors for the docflow library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the failure class. Duplicates and flagged analyses are not errors; they are
//! variants of `Outcome` and `Verdict`.

use std::time::Duration;

use thiserror::Error;

/// Top-level error for operations that can abort a whole run.
///
/// Per-candidate and per-stage failures never surface here; they are captured
/// in the batch reports instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration is invalid (unknown source, bad weights, ...)
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Document store unavailable or failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Candidate discovery failed
    #[error("discovery error: {0}")]
    Source(#[from] SourceError),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

/// Failure of a single fetch, classified as transient or permanent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Attempt exceeded the per-request timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, reset, DNS failure, ...
    #[error("connection error: {0}")]
    Connection(String),

    /// Server-side or throttling status (408, 429, 5xx)
    #[error("transient HTTP status {status}")]
    TransientStatus {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// Status that will not change on retry (403, 404, ...)
    #[error("HTTP status {0}")]
    PermanentStatus(u16),

    /// robots.txt excludes this path
    #[error("robots.txt disallows: {0}")]
    RobotsDisallowed(String),

    /// Locator could not be parsed into an origin
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// Locator failed permanently earlier in this run
    #[error("negatively cached: {0}")]
    NegativelyCached(String),

    /// All attempts failed transiently
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },

    /// Run-level cancellation observed
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Connection(_) | FetchError::TransientStatus { .. }
        )
    }

    /// Whether the locator should be negatively cached.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchError::PermanentStatus(_)
                | FetchError::RobotsDisallowed(_)
                | FetchError::InvalidLocator(_)
                | FetchError::NegativelyCached(_)
        )
    }

    /// Server-provided retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::TransientStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors raised by a `Transport` implementation for one request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request did not complete in time
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure
    #[error("connection failed: {0}")]
    Connection(String),

    /// Anything else the client reported
    #[error("transport error: {0}")]
    Other(String),
}

/// Errors from turning fetched bytes into text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// No extractor handles this media type
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Bytes could not be decoded
    #[error("garbled content: {0}")]
    Garbled(String),

    /// Extracted text is below the minimum length
    #[error("insufficient text: {chars} chars (minimum {min})")]
    InsufficientText { chars: usize, min: usize },
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Content hash or locator already stored
    #[error("conflicts with stored document {existing_id}")]
    Conflict { existing_id: uuid::Uuid },

    /// Referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific failure
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Failure of one analysis stage. Isolated to that stage.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StageError {
    /// Stage exceeded its timeout
    #[error("stage timed out after {0} ms")]
    Timeout(u64),

    /// Stage returned something that is not a structured payload
    #[error("invalid stage output: {0}")]
    InvalidOutput(String),

    /// Stage backend failed
    #[error("stage failed: {0}")]
    Failed(String),

    /// Run was cancelled before the stage ran
    #[error("stage cancelled")]
    Cancelled,
}

/// Why one candidate failed to ingest. Never aborts the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("extraction failed: {0}")]
    Extract(ExtractError),

    #[error("insufficient text: {chars} chars (minimum {min})")]
    InsufficientText { chars: usize, min: usize },

    #[error("store failed: {0}")]
    Store(String),

    #[error("cancelled")]
    Cancelled,

    /// Worker panicked or could not be scheduled
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from candidate discovery.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Every listing page of a source failed to fetch
    #[error("source {source_name} unreachable: {reason}")]
    Unreachable { source_name: String, reason: String },

    /// Listing content could not be interpreted
    #[error("listing parse error: {0}")]
    Parse(String),
}

/// Fatal configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Source selector names no known source
    #[error("unknown source selector: {0}")]
    UnknownSource(String),

    /// Workflow references a stage that is not registered
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// Gate weights are malformed
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// A numeric parameter is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Config file could not be read or parsed
    #[error("config file error: {0}")]
    File(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for stage invocations.
pub type StageResult<T> = std::result::Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(FetchError::Connection("reset".into()).is_transient());
        assert!(FetchError::TransientStatus {
            status: 503,
            retry_after: None
        }
        .is_transient());

        assert!(FetchError::PermanentStatus(404).is_permanent());
        assert!(FetchError::RobotsDisallowed("/private".into()).is_permanent());
        assert!(!FetchError::PermanentStatus(404).is_transient());

        let exhausted = FetchError::Exhausted {
            attempts: 4,
            last: Box::new(FetchError::Timeout(Duration::from_secs(1))),
        };
        assert!(!exhausted.is_transient());
        assert!(!exhausted.is_permanent());
    }

    #[test]
    fn test_retry_after_only_on_transient_status() {
        let err = FetchError::TransientStatus {
            status: 429,
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(FetchError::Timeout(Duration::ZERO).retry_after(), None);
    }
}
