//! Document store trait.
//!
//! Documents are unique by content hash and by locator. An insert that would
//! break either constraint fails with `StoreError::Conflict`, carrying the id
//! of the document already holding the key.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::document::{NormalizedDocument, ReviewRecord, StoredDocument};

/// Persistent storage for documents and review records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get a document by id.
    async fn get(&self, id: Uuid) -> StoreResult<Option<StoredDocument>>;

    /// Get the document with this content hash.
    async fn find_by_hash(&self, content_hash: &str) -> StoreResult<Option<StoredDocument>>;

    /// Get the document fetched from this locator.
    async fn find_by_locator(&self, locator: &str) -> StoreResult<Option<StoredDocument>>;

    /// Store a new document.
    async fn insert(&self, doc: NormalizedDocument) -> StoreResult<StoredDocument>;

    /// Persist a review record, returning its id.
    async fn save_review(&self, review: ReviewRecord) -> StoreResult<Uuid>;

    /// Get a review record by id.
    async fn get_review(&self, id: Uuid) -> StoreResult<Option<ReviewRecord>>;

    /// Reviews still awaiting a human, oldest first.
    async fn pending_reviews(&self) -> StoreResult<Vec<ReviewRecord>>;

    /// Verify the store is reachable.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
