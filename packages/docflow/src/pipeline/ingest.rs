//! Ingestion pipeline - fetch, extract, deduplicate, and store candidates.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dedup::{normalize_text, Admission, ContentDeduplicator, Persisted};
use crate::error::{IngestError, StoreError};
use crate::fetch::PoliteFetcher;
use crate::traits::{extractor::ContentExtractor, store::DocumentStore};
use crate::types::{
    config::{FetchPolicy, IngestConfig},
    document::{Candidate, NormalizedDocument},
};

/// What made a candidate a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    /// Locator already stored, possibly with different content
    Locator,

    /// Fetched content matches a stored document
    Content,
}

/// Result of ingesting one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { id: Uuid },
    Duplicate { existing_id: Uuid, kind: DuplicateKind },
    Error(IngestError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOutcome {
    pub locator: String,
    pub outcome: Outcome,
}

/// Result of one ingestion batch.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub source: String,

    /// One entry per candidate, in input order
    pub outcomes: Vec<CandidateOutcome>,

    pub succeeded: usize,
    pub duplicates: usize,
    pub errors: usize,
}

impl IngestReport {
    fn new(source: &str, outcomes: Vec<CandidateOutcome>) -> Self {
        let mut report = Self {
            source: source.to_string(),
            ..Default::default()
        };
        for o in &outcomes {
            match o.outcome {
                Outcome::Success { .. } => report.succeeded += 1,
                Outcome::Duplicate { .. } => report.duplicates += 1,
                Outcome::Error(_) => report.errors += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }

    /// Ids of newly stored documents, in input order.
    pub fn stored_ids(&self) -> Vec<Uuid> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.outcome {
                Outcome::Success { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// No candidate failed.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

#[derive(Clone)]
struct Shared {
    fetcher: Arc<PoliteFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    store: Arc<dyn DocumentStore>,
    dedup: ContentDeduplicator,
    policy: FetchPolicy,
    config: IngestConfig,
    cancel: CancellationToken,
}

/// Runs candidates through fetch → extract → dedup → store on a bounded pool.
#[derive(Clone)]
pub struct IngestionPipeline {
    shared: Shared,
}

impl IngestionPipeline {
    pub fn new(
        fetcher: Arc<PoliteFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let cancel = fetcher.cancellation_token().clone();
        Self {
            shared: Shared {
                fetcher,
                extractor,
                dedup: ContentDeduplicator::new(store.clone()),
                store,
                policy: FetchPolicy::default(),
                config: IngestConfig::default(),
                cancel,
            },
        }
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.shared.policy = policy;
        self
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.shared.config = config;
        self
    }

    /// Share a deduplicator with other pipelines using the same store.
    pub fn with_deduplicator(mut self, dedup: ContentDeduplicator) -> Self {
        self.shared.dedup = dedup;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shared.cancel = token;
        self
    }

    /// Ingest a batch. Individual failures are reported, never raised.
    pub async fn run(&self, candidates: Vec<Candidate>, source_name: &str) -> IngestReport {
        let total = candidates.len();
        info!(
            source = %source_name,
            candidates = total,
            concurrency = self.shared.config.concurrency,
            "ingestion starting"
        );

        let locators: Vec<String> = candidates.iter().map(|c| c.locator.clone()).collect();
        let shared = Arc::new(self.shared.clone());
        let semaphore = Arc::new(Semaphore::new(self.shared.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let semaphore = Arc::clone(&semaphore);
            let source = source_name.to_string();
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => ingest_one(&shared, candidate, &source).await,
                    Err(_) => Outcome::Error(IngestError::Internal("worker pool closed".into())),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Outcome>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(source = %source_name, error = %e, "ingest worker failed"),
            }
        }

        let outcomes = locators
            .into_iter()
            .zip(slots)
            .map(|(locator, slot)| CandidateOutcome {
                locator,
                outcome: slot.unwrap_or_else(|| {
                    Outcome::Error(IngestError::Internal("worker panicked".into()))
                }),
            })
            .collect();

        let report = IngestReport::new(source_name, outcomes);
        info!(
            source = %source_name,
            succeeded = report.succeeded,
            duplicates = report.duplicates,
            errors = report.errors,
            "ingestion complete"
        );
        report
    }
}

async fn ingest_one(shared: &Shared, candidate: Candidate, source: &str) -> Outcome {
    let locator = candidate.locator.as_str();

    if shared.cancel.is_cancelled() {
        return Outcome::Error(IngestError::Cancelled);
    }

    match shared.store.find_by_locator(locator).await {
        Ok(Some(existing)) => {
            debug!(url = %locator, id = %existing.id, "locator already stored");
            return Outcome::Duplicate {
                existing_id: existing.id,
                kind: DuplicateKind::Locator,
            };
        }
        Ok(None) => {}
        Err(e) => return store_error(locator, e),
    }

    let (raw, media_type) = match &candidate.inline_text {
        Some(text) => (text.clone(), Some("text/plain".to_string())),
        None => {
            let fetched = shared
                .fetcher
                .fetch_with(locator, &shared.policy, &shared.cancel)
                .await;
            let body = match (fetched.error, fetched.body) {
                (None, Some(body)) => body,
                (Some(e), _) => {
                    warn!(url = %locator, error = %e, "fetch failed");
                    return Outcome::Error(IngestError::Fetch(e));
                }
                (None, None) => {
                    return Outcome::Error(IngestError::Internal("fetch returned no body".into()))
                }
            };

            if shared.cancel.is_cancelled() {
                return Outcome::Error(IngestError::Cancelled);
            }

            match shared.extractor.extract(&body, fetched.media_type.as_deref()) {
                Ok(text) => (text, fetched.media_type),
                Err(e) => {
                    warn!(url = %locator, error = %e, "extraction failed");
                    return Outcome::Error(IngestError::Extract(e));
                }
            }
        }
    };

    let text = normalize_text(&raw);
    let chars = text.chars().count();
    if chars < shared.config.min_text_chars {
        debug!(url = %locator, chars, "text too short");
        return Outcome::Error(IngestError::InsufficientText {
            chars,
            min: shared.config.min_text_chars,
        });
    }

    let ticket = match shared.dedup.admit(&text).await {
        Ok(Admission::New(ticket)) => ticket,
        Ok(Admission::Duplicate { hash, existing_id }) => {
            debug!(url = %locator, hash = %hash, %existing_id, "duplicate content");
            return Outcome::Duplicate {
                existing_id,
                kind: DuplicateKind::Content,
            };
        }
        Err(e) => return store_error(locator, e),
    };

    let doc = NormalizedDocument {
        locator: candidate.locator.clone(),
        content_hash: ticket.hash().to_string(),
        text,
        source: source.to_string(),
        declared_date: candidate.declared_date,
        title: candidate.title.clone(),
        media_type,
    };

    match ticket.persist(doc).await {
        Ok(Persisted::Stored(stored)) => {
            info!(url = %locator, id = %stored.id, "stored document");
            Outcome::Success { id: stored.id }
        }
        Ok(Persisted::Duplicate(existing_id)) => Outcome::Duplicate {
            existing_id,
            kind: DuplicateKind::Content,
        },
        Ok(Persisted::LocatorTaken(existing_id)) => {
            debug!(url = %locator, %existing_id, "locator stored concurrently with other content");
            Outcome::Duplicate {
                existing_id,
                kind: DuplicateKind::Locator,
            }
        }
        Err(e) => store_error(locator, e),
    }
}

fn store_error(locator: &str, e: StoreError) -> Outcome {
    warn!(url = %locator, error = %e, "store operation failed");
    Outcome::Error(IngestError::Store(e.to_string()))
}
