//! Fixed candidate lists (manifests, tests).

use async_trait::async_trait;
use tracing::debug;

use crate::error::SourceError;
use crate::traits::source::CandidateSource;
use crate::types::{config::DiscoveryWindow, document::Candidate};

/// A source that always returns the same candidates.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    candidates: Vec<Candidate>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
        }
    }

    /// Add a candidate. Its `source` is overwritten with this source's name.
    pub fn with_candidate(mut self, mut candidate: Candidate) -> Self {
        candidate.source = self.name.clone();
        self.candidates.push(candidate);
        self
    }

    pub fn with_candidates(self, candidates: impl IntoIterator<Item = Candidate>) -> Self {
        candidates.into_iter().fold(self, Self::with_candidate)
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self, _window: &DiscoveryWindow) -> Result<Vec<Candidate>, SourceError> {
        debug!(source = %self.name, candidates = self.candidates.len(), "static candidates");
        Ok(self.candidates.clone())
    }
}
