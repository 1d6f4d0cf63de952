//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Every tool-level operation catches these at its boundary and turns
//! them into a structured `{ "success": false, "error": ... }` result;
//! the HTTP/CLI layers never see an unhandled panic from a tool call.

use thiserror::Error;

/// Library-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Required settings are missing or inconsistent. Fatal for the
    /// operation, not the process.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The OAuth2 token exchange failed after the retry budget.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The embedding inference call failed after the retry budget, or
    /// returned malformed vectors.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// Non-success status from the persistence backend.
    #[error("storage error: HTTP {status}: {body}")]
    Storage { status: u16, body: String },

    /// Empty or otherwise invalid caller input (url, path, query).
    #[error("invalid input: {0}")]
    Validation(String),

    /// Crawl fetch failure for a single page.
    #[error("crawl failed: {0}")]
    Crawl(String),
}

impl Error {
    pub(crate) fn storage(status: u16, body: impl Into<String>) -> Self {
        Error::Storage {
            status,
            body: body.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
