//! Core data models used throughout docrag.
//!
//! These types mirror the rows exchanged with the PostgREST backend and
//! the results that flow out of the retrieval engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Aggregate registry row for one ingestion root (`/sources` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub total_word_count: u64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// One embeddable unit of stored text (`/crawled_pages` row).
///
/// `(url, chunk_number)` is unique; re-ingesting an origin replaces its
/// prior rows rather than appending to them.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    /// Origin document: a page URL or a `file://` URI.
    pub url: String,
    /// 0-based ordinal within the origin document.
    pub chunk_number: usize,
    /// Chunk text, trimmed and non-empty.
    pub content: String,
    /// Open key-value metadata (file name, extension, position info).
    pub metadata: Value,
    /// Groups chunks under their source for filtering and deletion.
    pub source_id: String,
    /// Fixed-dimension vector; `None` only as an explicit degraded
    /// marker, never a silent omission.
    pub embedding: Option<Vec<f32>>,
}

/// A ranked similarity match returned by the retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagMatch {
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub similarity: f64,
}
