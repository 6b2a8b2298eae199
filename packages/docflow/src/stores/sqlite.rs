//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Uniqueness of content hash and
//! locator is enforced by the schema, so several processes sharing one
//! database file still store each document once.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::DocumentStore;
use crate::types::document::{
    NormalizedDocument, ReviewRecord, ReviewStatus, StoredDocument,
};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("invalid {} in row: {}", what, e).into())
}

/// SQLite-based document store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and migrate) a database.
    ///
    /// # Example URLs
    /// - `sqlite:./docflow.db?mode=rwc` - Create the file if missing
    /// - `sqlite::memory:` - Ephemeral, see [`SqliteStore::in_memory`]
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::connect(database_url, 5).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// Uses a single connection; each SQLite memory connection is its own
    /// database.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                locator TEXT NOT NULL UNIQUE,
                content_hash TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                declared_date TEXT,
                title TEXT,
                media_type TEXT,
                stored_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id),
                score REAL NOT NULL,
                threshold REAL NOT NULL,
                reasons TEXT NOT NULL DEFAULT '[]',
                recommendations TEXT NOT NULL DEFAULT '[]',
                analysis TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'resolved')),
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Mark a review as resolved.
    pub async fn resolve_review(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE reviews SET status = 'resolved' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("review {}", id)));
        }
        Ok(())
    }

    async fn conflicting_id(&self, doc: &NormalizedDocument) -> StoreResult<Uuid> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE content_hash = ? OR locator = ? LIMIT 1",
        )
        .bind(&doc.content_hash)
        .bind(&doc.locator)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let id = id.ok_or_else(|| {
            StoreError::Backend("unique violation without a conflicting row".into())
        })?;
        Uuid::parse_str(&id).map_err(|e| corrupt("id", e))
    }

    async fn fetch_document(
        &self,
        clause: &str,
        value: String,
    ) -> StoreResult<Option<StoredDocument>> {
        let sql = format!(
            "SELECT id, locator, content_hash, text, source, declared_date, title, media_type, stored_at \
             FROM documents WHERE {} = ?",
            clause
        );
        sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(DocumentRow::into_document)
            .transpose()
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    locator: String,
    content_hash: String,
    text: String,
    source: String,
    declared_date: Option<String>,
    title: Option<String>,
    media_type: Option<String>,
    stored_at: String,
}

impl DocumentRow {
    fn into_document(self) -> StoreResult<StoredDocument> {
        let declared_date = self
            .declared_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
            .transpose()
            .map_err(|e| corrupt("declared_date", e))?;

        Ok(StoredDocument {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt("id", e))?,
            locator: self.locator,
            text: self.text,
            content_hash: self.content_hash,
            source: self.source,
            declared_date,
            title: self.title,
            media_type: self.media_type,
            stored_at: parse_timestamp(&self.stored_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    id: String,
    document_id: String,
    score: f64,
    threshold: f64,
    reasons: String,
    recommendations: String,
    analysis: String,
    status: String,
    created_at: String,
}

impl ReviewRow {
    fn into_review(self) -> StoreResult<ReviewRecord> {
        Ok(ReviewRecord {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt("id", e))?,
            document_id: Uuid::parse_str(&self.document_id)
                .map_err(|e| corrupt("document_id", e))?,
            score: self.score,
            threshold: self.threshold,
            reasons: serde_json::from_str(&self.reasons).map_err(|e| corrupt("reasons", e))?,
            recommendations: serde_json::from_str(&self.recommendations)
                .map_err(|e| corrupt("recommendations", e))?,
            analysis: self.analysis,
            status: ReviewStatus::parse(&self.status)
                .ok_or_else(|| corrupt("status", &self.status))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

const REVIEW_COLUMNS: &str =
    "id, document_id, score, threshold, reasons, recommendations, analysis, status, created_at";

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<StoredDocument>> {
        self.fetch_document("id", id.to_string()).await
    }

    async fn find_by_hash(&self, content_hash: &str) -> StoreResult<Option<StoredDocument>> {
        self.fetch_document("content_hash", content_hash.to_string())
            .await
    }

    async fn find_by_locator(&self, locator: &str) -> StoreResult<Option<StoredDocument>> {
        self.fetch_document("locator", locator.to_string()).await
    }

    async fn insert(&self, doc: NormalizedDocument) -> StoreResult<StoredDocument> {
        let stored = StoredDocument::from_normalized(doc.clone());

        let result = sqlx::query(
            r#"
            INSERT INTO documents
                (id, locator, content_hash, text, source, declared_date, title, media_type, stored_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stored.id.to_string())
        .bind(&stored.locator)
        .bind(&stored.content_hash)
        .bind(&stored.text)
        .bind(&stored.source)
        .bind(stored.declared_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(&stored.title)
        .bind(&stored.media_type)
        .bind(stored.stored_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(stored),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing_id = self.conflicting_id(&doc).await?;
                Err(StoreError::Conflict { existing_id })
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn save_review(&self, review: ReviewRecord) -> StoreResult<Uuid> {
        let reasons = serde_json::to_string(&review.reasons)
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        let recommendations = serde_json::to_string(&review.recommendations)
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO reviews
                (id, document_id, score, threshold, reasons, recommendations, analysis, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(review.id.to_string())
        .bind(review.document_id.to_string())
        .bind(review.score)
        .bind(review.threshold)
        .bind(reasons)
        .bind(recommendations)
        .bind(&review.analysis)
        .bind(review.status.as_str())
        .bind(review.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(review.id),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => Err(
                StoreError::NotFound(format!("document {}", review.document_id)),
            ),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_review(&self, id: Uuid) -> StoreResult<Option<ReviewRecord>> {
        let sql = format!("SELECT {} FROM reviews WHERE id = ?", REVIEW_COLUMNS);
        sqlx::query_as::<_, ReviewRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(ReviewRow::into_review)
            .transpose()
    }

    async fn pending_reviews(&self) -> StoreResult<Vec<ReviewRecord>> {
        let sql = format!(
            "SELECT {} FROM reviews WHERE status = 'pending' ORDER BY created_at",
            REVIEW_COLUMNS
        );
        sqlx::query_as::<_, ReviewRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(ReviewRow::into_review)
            .collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
