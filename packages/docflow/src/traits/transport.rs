//! Transport trait - one HTTP GET, no retries or politeness.
//!
//! `PoliteFetcher` layers spacing, robots.txt, retry, and classification on
//! top of a `Transport`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TransportError;

/// Raw response to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,

    /// Media type without parameters, lowercased (`text/html`)
    pub media_type: Option<String>,

    /// Parsed `Retry-After` header (delta-seconds form)
    pub retry_after: Option<Duration>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            media_type: None,
            retry_after: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Strip parameters from a `Content-Type` value and lowercase it.
pub fn media_type_of(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

/// Issue a single GET request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a URL, giving up after `timeout`.
    async fn get(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}
