//! Document types - candidates, fetch results, stored documents, reviews.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FetchError;

/// A locator discovered by a source, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// URL or other locator of the document
    pub locator: String,

    /// Title as declared by the source
    pub title: Option<String>,

    /// Publication date as declared by the source
    pub declared_date: Option<NaiveDate>,

    /// Text supplied directly by the source (skips fetching)
    pub inline_text: Option<String>,

    /// Name of the source that produced this candidate
    #[serde(default)]
    pub source: String,
}

impl Candidate {
    /// Create a candidate for a locator.
    pub fn new(locator: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: None,
            declared_date: None,
            inline_text: None,
            source: source.into(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the declared date.
    pub fn with_declared_date(mut self, date: NaiveDate) -> Self {
        self.declared_date = Some(date);
        self
    }

    /// Provide the text inline.
    pub fn with_inline_text(mut self, text: impl Into<String>) -> Self {
        self.inline_text = Some(text.into());
        self
    }
}

/// Outcome of fetching one locator, including all retries.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Locator that was requested
    pub locator: String,

    /// Response body on success
    pub body: Option<Vec<u8>>,

    /// Media type reported by the server (without parameters)
    pub media_type: Option<String>,

    /// Status code of the last attempt that produced a response
    pub status: Option<u16>,

    /// Number of network attempts made
    pub attempts: u32,

    /// Failure, if the fetch did not succeed
    pub error: Option<FetchError>,
}

impl FetchResult {
    pub(crate) fn success(
        locator: impl Into<String>,
        body: Vec<u8>,
        media_type: Option<String>,
        status: u16,
        attempts: u32,
    ) -> Self {
        Self {
            locator: locator.into(),
            body: Some(body),
            media_type,
            status: Some(status),
            attempts,
            error: None,
        }
    }

    pub(crate) fn failure(
        locator: impl Into<String>,
        error: FetchError,
        status: Option<u16>,
        attempts: u32,
    ) -> Self {
        Self {
            locator: locator.into(),
            body: None,
            media_type: None,
            status,
            attempts,
            error: Some(error),
        }
    }

    /// Body was retrieved.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.body.is_some()
    }

    /// The fetch failed and will not be retried.
    pub fn is_terminal_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Extracted, normalized and hashed document ready for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub locator: String,

    /// Normalized text
    pub text: String,

    /// SHA-256 hex of `text`
    pub content_hash: String,

    pub source: String,
    pub declared_date: Option<NaiveDate>,
    pub title: Option<String>,
    pub media_type: Option<String>,
}

/// A document persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub locator: String,
    pub text: String,
    pub content_hash: String,
    pub source: String,
    pub declared_date: Option<NaiveDate>,
    pub title: Option<String>,
    pub media_type: Option<String>,

    /// When the document was stored
    pub stored_at: DateTime<Utc>,
}

impl StoredDocument {
    /// Assign a fresh id and timestamp to a normalized document.
    pub fn from_normalized(doc: NormalizedDocument) -> Self {
        Self {
            id: Uuid::new_v4(),
            locator: doc.locator,
            text: doc.text,
            content_hash: doc.content_hash,
            source: doc.source,
            declared_date: doc.declared_date,
            title: doc.title,
            media_type: doc.media_type,
            stored_at: Utc::now(),
        }
    }
}

/// Review workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Resolved,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "resolved" => Some(ReviewStatus::Resolved),
            _ => None,
        }
    }
}

/// A flagged analysis queued for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub score: f64,
    pub threshold: f64,

    /// Why the analysis was flagged
    pub reasons: Vec<String>,

    #[serde(default)]
    pub recommendations: Vec<String>,

    /// Serialized consolidated result, truncated
    pub analysis: String,

    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_builder() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let c = Candidate::new("https://example.com/a.pdf", "court")
            .with_title("Judgment A")
            .with_declared_date(date);

        assert_eq!(c.source, "court");
        assert_eq!(c.title.as_deref(), Some("Judgment A"));
        assert_eq!(c.declared_date, Some(date));
        assert!(c.inline_text.is_none());
    }

    #[test]
    fn test_fetch_result_classifiers() {
        let ok = FetchResult::success("u", b"hi".to_vec(), None, 200, 1);
        assert!(ok.is_success());
        assert!(!ok.is_terminal_failure());

        let err = FetchResult::failure("u", FetchError::PermanentStatus(404), Some(404), 1);
        assert!(!err.is_success());
        assert!(err.is_terminal_failure());
    }

    #[test]
    fn test_review_status_roundtrip_str() {
        assert_eq!(ReviewStatus::parse("pending"), Some(ReviewStatus::Pending));
        assert_eq!(ReviewStatus::Resolved.as_str(), "resolved");
        assert_eq!(ReviewStatus::parse("open"), None);
    }
}
