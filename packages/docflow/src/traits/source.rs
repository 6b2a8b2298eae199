//! Candidate discovery trait.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{config::DiscoveryWindow, document::Candidate};

/// Lists candidate documents for one external source.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Source name used by the selector.
    fn name(&self) -> &str;

    /// Discover candidates inside the window.
    ///
    /// Implementations may return more than `max_candidates` or dated
    /// candidates outside the lookback; callers apply `DiscoveryWindow::apply`.
    async fn discover(&self, window: &DiscoveryWindow) -> Result<Vec<Candidate>, SourceError>;
}
