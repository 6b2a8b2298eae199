//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::DocumentStore;
use crate::types::document::{
    NormalizedDocument, ReviewRecord, ReviewStatus, StoredDocument,
};

#[derive(Default)]
struct Documents {
    by_id: HashMap<Uuid, StoredDocument>,
    by_hash: HashMap<String, Uuid>,
    by_locator: HashMap<String, Uuid>,
}

/// In-memory storage for documents and reviews.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    documents: RwLock<Documents>,
    reviews: RwLock<Vec<ReviewRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Documents::default()),
            reviews: RwLock::new(Vec::new()),
        }
    }

    /// Get the number of stored documents.
    pub fn document_count(&self) -> usize {
        self.documents.read().unwrap().by_id.len()
    }

    /// Get the number of stored reviews.
    pub fn review_count(&self) -> usize {
        self.reviews.read().unwrap().len()
    }

    /// Mark a review as resolved.
    pub fn resolve_review(&self, id: Uuid) -> StoreResult<()> {
        let mut reviews = self.reviews.write().unwrap();
        let review = reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("review {}", id)))?;
        review.status = ReviewStatus::Resolved;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<StoredDocument>> {
        Ok(self.documents.read().unwrap().by_id.get(&id).cloned())
    }

    async fn find_by_hash(&self, content_hash: &str) -> StoreResult<Option<StoredDocument>> {
        let docs = self.documents.read().unwrap();
        Ok(docs
            .by_hash
            .get(content_hash)
            .and_then(|id| docs.by_id.get(id))
            .cloned())
    }

    async fn find_by_locator(&self, locator: &str) -> StoreResult<Option<StoredDocument>> {
        let docs = self.documents.read().unwrap();
        Ok(docs
            .by_locator
            .get(locator)
            .and_then(|id| docs.by_id.get(id))
            .cloned())
    }

    async fn insert(&self, doc: NormalizedDocument) -> StoreResult<StoredDocument> {
        let mut docs = self.documents.write().unwrap();

        if let Some(existing_id) = docs
            .by_hash
            .get(&doc.content_hash)
            .or_else(|| docs.by_locator.get(&doc.locator))
        {
            return Err(StoreError::Conflict {
                existing_id: *existing_id,
            });
        }

        let stored = StoredDocument::from_normalized(doc);
        docs.by_hash.insert(stored.content_hash.clone(), stored.id);
        docs.by_locator.insert(stored.locator.clone(), stored.id);
        docs.by_id.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save_review(&self, review: ReviewRecord) -> StoreResult<Uuid> {
        if !self
            .documents
            .read()
            .unwrap()
            .by_id
            .contains_key(&review.document_id)
        {
            return Err(StoreError::NotFound(format!(
                "document {}",
                review.document_id
            )));
        }
        let id = review.id;
        self.reviews.write().unwrap().push(review);
        Ok(id)
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Option<ReviewRecord>> {
        Ok(self
            .reviews
            .read()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn pending_reviews(&self) -> StoreResult<Vec<ReviewRecord>> {
        Ok(self
            .reviews
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .cloned()
            .collect())
    }
}
