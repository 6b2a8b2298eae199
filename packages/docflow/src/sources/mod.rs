//! Candidate sources and the selector catalog.

pub mod listing;
pub mod static_list;

pub use listing::{ListingConfig, ListingSource};
pub use static_list::StaticSource;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::fetch::PoliteFetcher;
use crate::traits::source::CandidateSource;
use crate::types::{config::FetchPolicy, document::Candidate};

/// Selector that picks every registered source.
pub const ALL_SOURCES: &str = "all";

/// Serializable source declaration (config files).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    Listing(ListingConfig),
    Static {
        name: String,
        candidates: Vec<Candidate>,
    },
}

impl SourceSpec {
    pub fn name(&self) -> &str {
        match self {
            SourceSpec::Listing(config) => &config.name,
            SourceSpec::Static { name, .. } => name,
        }
    }

    /// Build the source. Listing sources share `fetcher`.
    pub fn build(&self, fetcher: &Arc<PoliteFetcher>, policy: &FetchPolicy) -> Arc<dyn CandidateSource> {
        match self {
            SourceSpec::Listing(config) => Arc::new(ListingSource::new(
                config.clone(),
                Arc::clone(fetcher),
                policy.clone(),
            )),
            SourceSpec::Static { name, candidates } => {
                Arc::new(StaticSource::new(name.clone()).with_candidates(candidates.clone()))
            }
        }
    }
}

/// Registered sources by name.
#[derive(Clone, Default)]
pub struct SourceCatalog {
    sources: IndexMap<String, Arc<dyn CandidateSource>>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name. A later source with the same
    /// name replaces the earlier one.
    pub fn with_source(mut self, source: Arc<dyn CandidateSource>) -> Self {
        self.sources.insert(source.name().to_string(), source);
        self
    }

    /// Build every declared source.
    pub fn from_specs(specs: &[SourceSpec], fetcher: &Arc<PoliteFetcher>, policy: &FetchPolicy) -> Self {
        specs
            .iter()
            .fold(Self::new(), |catalog, spec| catalog.with_source(spec.build(fetcher, policy)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources picked by `selector`: `all` or one source name.
    pub fn resolve(&self, selector: &str) -> Result<Vec<Arc<dyn CandidateSource>>, ConfigError> {
        let selector = selector.trim();
        if selector.eq_ignore_ascii_case(ALL_SOURCES) {
            return Ok(self.sources.values().cloned().collect());
        }
        self.sources
            .get(selector)
            .map(|source| vec![Arc::clone(source)])
            .ok_or_else(|| ConfigError::UnknownSource(selector.to_string()))
    }
}
