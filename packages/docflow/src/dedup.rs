//! Content-addressed deduplication.
//!
//! Documents are identified by the SHA-256 of their normalized text. The
//! deduplicator guarantees that, within one process, at most one caller holds
//! the right to persist a given hash at a time. Concurrent admitters of the
//! same hash wait for the holder's outcome instead of racing the store.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::DocumentStore;
use crate::types::document::{NormalizedDocument, StoredDocument};

/// Canonical text form: LF line endings, every line trimmed, blank lines
/// removed.
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 of normalized text, as 64 lowercase hex characters.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    Pending,
    Persisted(Uuid),
    Released,
}

type ClaimTable = Arc<Mutex<HashMap<String, watch::Receiver<ClaimState>>>>;

enum Claim {
    Owned(watch::Sender<ClaimState>),
    Waiting(watch::Receiver<ClaimState>),
}

/// Result of admitting a text.
#[derive(Debug)]
pub enum Admission {
    /// First sighting; the ticket holds the exclusive right to persist.
    New(AdmissionTicket),

    /// Content already stored (or just stored by a concurrent admitter).
    Duplicate { hash: String, existing_id: Uuid },
}

impl Admission {
    pub fn is_new(&self) -> bool {
        matches!(self, Admission::New(_))
    }

    pub fn hash(&self) -> &str {
        match self {
            Admission::New(ticket) => ticket.hash(),
            Admission::Duplicate { hash, .. } => hash,
        }
    }
}

/// What happened when a ticket was persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    Stored(StoredDocument),

    /// The same content is already stored under this id.
    Duplicate(Uuid),

    /// The locator is taken by a document with different content. The
    /// claim is released so other admitters of this hash can still store it.
    LocatorTaken(Uuid),
}

/// Exclusive claim on a content hash.
///
/// Dropping the ticket without persisting releases the claim, letting a
/// waiting admitter try again.
pub struct AdmissionTicket {
    hash: String,
    claim: Option<watch::Sender<ClaimState>>,
    claims: ClaimTable,
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("hash", &self.hash)
            .field("held", &self.claim.is_some())
            .finish()
    }
}

impl AdmissionTicket {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Insert the document and publish the outcome to waiters.
    pub async fn persist(mut self, doc: NormalizedDocument) -> StoreResult<Persisted> {
        debug_assert_eq!(doc.content_hash, self.hash);

        match self.store.insert(doc).await {
            Ok(stored) => {
                self.finish(ClaimState::Persisted(stored.id));
                Ok(Persisted::Stored(stored))
            }
            Err(StoreError::Conflict { existing_id }) => {
                debug!(hash = %self.hash, %existing_id, "store reported conflict");
                // The conflict may be on the locator alone.
                match self.store.find_by_hash(&self.hash).await {
                    Ok(Some(same)) => {
                        self.finish(ClaimState::Persisted(same.id));
                        Ok(Persisted::Duplicate(same.id))
                    }
                    Ok(None) => {
                        self.finish(ClaimState::Released);
                        Ok(Persisted::LocatorTaken(existing_id))
                    }
                    Err(e) => {
                        self.finish(ClaimState::Released);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.finish(ClaimState::Released);
                Err(e)
            }
        }
    }

    fn finish(&mut self, state: ClaimState) {
        if let Some(claim) = self.claim.take() {
            self.claims.lock().unwrap().remove(&self.hash);
            claim.send_replace(state);
        }
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.finish(ClaimState::Released);
    }
}

/// Admits texts against the store with exactly-once semantics per hash.
#[derive(Clone)]
pub struct ContentDeduplicator {
    store: Arc<dyn DocumentStore>,
    claims: ClaimTable,
}

impl ContentDeduplicator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            claims: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Normalize and hash `text`, then decide whether it is new.
    pub async fn admit(&self, text: &str) -> StoreResult<Admission> {
        let hash = content_hash(&normalize_text(text));

        loop {
            match self.claim(&hash) {
                Claim::Owned(sender) => {
                    let ticket = AdmissionTicket {
                        hash: hash.clone(),
                        claim: Some(sender),
                        claims: Arc::clone(&self.claims),
                        store: Arc::clone(&self.store),
                    };
                    // Ticket drop releases the claim if the lookup fails.
                    return match self.store.find_by_hash(&hash).await? {
                        Some(existing) => {
                            let mut ticket = ticket;
                            ticket.finish(ClaimState::Persisted(existing.id));
                            Ok(Admission::Duplicate {
                                hash,
                                existing_id: existing.id,
                            })
                        }
                        None => Ok(Admission::New(ticket)),
                    };
                }
                Claim::Waiting(mut rx) => {
                    let outcome = rx
                        .wait_for(|state| *state != ClaimState::Pending)
                        .await
                        .map(|state| *state);
                    match outcome {
                        Ok(ClaimState::Persisted(existing_id)) => {
                            return Ok(Admission::Duplicate { hash, existing_id });
                        }
                        // Released, or the holder vanished: try again.
                        _ => continue,
                    }
                }
            }
        }
    }

    fn claim(&self, hash: &str) -> Claim {
        let mut claims = self.claims.lock().unwrap();
        if let Some(rx) = claims.get(hash) {
            return Claim::Waiting(rx.clone());
        }
        let (tx, rx) = watch::channel(ClaimState::Pending);
        claims.insert(hash.to_string(), rx);
        Claim::Owned(tx)
    }

    /// Number of hashes currently claimed.
    pub fn in_flight(&self) -> usize {
        self.claims.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;

    fn doc(locator: &str, text: &str) -> NormalizedDocument {
        let text = normalize_text(text);
        NormalizedDocument {
            locator: locator.to_string(),
            content_hash: content_hash(&text),
            text,
            source: "test".into(),
            declared_date: None,
            title: None,
            media_type: Some("text/plain".into()),
        }
    }

    #[test]
    fn test_normalize_text() {
        let raw = "  Line one  \r\n\r\n\tLine two\rLine three \n\n   \n";
        assert_eq!(normalize_text(raw), "Line one\nLine two\nLine three");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(&normalize_text(raw)), normalize_text(raw));
    }

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[tokio::test]
    async fn test_admit_then_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let dedup = ContentDeduplicator::new(store.clone());

        let first = dedup.admit("Some text").await.unwrap();
        assert!(first.is_new());
        let Admission::New(ticket) = first else {
            unreachable!()
        };
        let stored = match ticket.persist(doc("a", "Some text")).await.unwrap() {
            Persisted::Stored(d) => d,
            other => panic!("expected stored, got {:?}", other),
        };

        // Whitespace differences normalize away.
        let second = dedup.admit("  Some text  \n\n").await.unwrap();
        match second {
            Admission::Duplicate { existing_id, .. } => assert_eq!(existing_id, stored.id),
            other => panic!("expected duplicate, got {:?}", other),
        }
        assert_eq!(store.document_count(), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_ticket_releases_claim() {
        let dedup = ContentDeduplicator::new(Arc::new(MemoryStore::new()));

        let first = dedup.admit("abandoned").await.unwrap();
        assert!(first.is_new());
        drop(first);

        assert_eq!(dedup.in_flight(), 0);
        assert!(dedup.admit("abandoned").await.unwrap().is_new());
    }

    #[tokio::test]
    async fn test_concurrent_admission_persists_once() {
        let store = Arc::new(MemoryStore::new());
        let dedup = ContentDeduplicator::new(store.clone());

        let mut handles = Vec::new();
        for i in 0..16 {
            let dedup = dedup.clone();
            handles.push(tokio::spawn(async move {
                match dedup.admit("same body").await.unwrap() {
                    Admission::New(ticket) => {
                        tokio::task::yield_now().await;
                        matches!(
                            ticket
                                .persist(doc(&format!("loc-{}", i), "same body"))
                                .await
                                .unwrap(),
                            Persisted::Stored(_)
                        )
                    }
                    Admission::Duplicate { .. } => false,
                }
            }));
        }

        let mut stored = 0;
        for handle in handles {
            if handle.await.unwrap() {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn test_hash_conflict_reported_as_duplicate() {
        let store = Arc::new(MemoryStore::new());
        // Two deduplicators over one store do not see each other's claims.
        let ours = ContentDeduplicator::new(store.clone());
        let theirs = ContentDeduplicator::new(store.clone());

        let Admission::New(ticket) = ours.admit("shared text").await.unwrap() else {
            panic!("expected new admission");
        };
        let Admission::New(other) = theirs.admit("shared text").await.unwrap() else {
            panic!("expected new admission");
        };
        let Persisted::Stored(winner) = other.persist(doc("loc-b", "shared text")).await.unwrap()
        else {
            panic!("expected stored");
        };

        let result = ticket.persist(doc("loc-a", "shared text")).await.unwrap();

        assert_eq!(result, Persisted::Duplicate(winner.id));
        assert_eq!(ours.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_locator_clash_releases_claim_for_waiters() {
        let store = Arc::new(MemoryStore::new());
        let older = store.insert(doc("loc-1", "content A")).await.unwrap();
        let dedup = ContentDeduplicator::new(store.clone());

        let Admission::New(ticket) = dedup.admit("content B").await.unwrap() else {
            panic!("expected new admission");
        };
        let waiter = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                match dedup.admit("content B").await.unwrap() {
                    Admission::New(ticket) => ticket.persist(doc("loc-2", "content B")).await.unwrap(),
                    Admission::Duplicate { existing_id, .. } => Persisted::Duplicate(existing_id),
                }
            })
        };
        tokio::task::yield_now().await;

        let first = ticket.persist(doc("loc-1", "content B")).await.unwrap();
        assert_eq!(first, Persisted::LocatorTaken(older.id));

        let second = waiter.await.unwrap();
        let Persisted::Stored(stored) = second else {
            panic!("expected content B to be stored, got {:?}", second);
        };
        assert_eq!(stored.locator, "loc-2");
        assert_eq!(
            store.find_by_hash(&content_hash("content B")).await.unwrap().map(|d| d.id),
            Some(stored.id)
        );
        assert_eq!(store.document_count(), 2);
    }
}
