//! Content extraction trait.

use crate::error::ExtractError;

/// Turns fetched bytes into raw text.
///
/// Implementations do not normalize; the pipeline normalizes and hashes the
/// returned text itself.
pub trait ContentExtractor: Send + Sync {
    /// Whether this extractor handles the media type.
    fn supports(&self, media_type: &str) -> bool;

    /// Extract text from a body. `media_type` is `None` when the server sent
    /// no `Content-Type`.
    fn extract(&self, body: &[u8], media_type: Option<&str>) -> Result<String, ExtractError>;
}
