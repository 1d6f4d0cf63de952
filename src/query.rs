//! Retrieval engine: similarity search over stored chunks.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::storage::StorageGateway;

/// Clamp a requested match count into `(0, max]`, falling back to the
/// default for zero, negative-ish, or out-of-range requests.
pub fn clamp_match_count(requested: Option<i64>, config: &RetrievalConfig) -> usize {
    match requested {
        Some(n) if n > 0 && n <= config.max_match_count as i64 => n as usize,
        _ => config.default_match_count,
    }
}

/// Truncate `content` to at most `max_chars` characters on a char
/// boundary, appending an ellipsis when something was cut.
pub fn truncate_excerpt(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Embed the query and return the ranked matches, optionally filtered
/// to one source. Stored content is never truncated, only the returned
/// excerpts are.
pub async fn rag_query(
    embeddings: &Arc<EmbeddingClient>,
    storage: &Arc<StorageGateway>,
    config: &RetrievalConfig,
    query: &str,
    source: Option<&str>,
    limit: Option<i64>,
) -> Result<Value> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::Validation("query must not be empty".into()));
    }
    let source = source.map(str::trim).filter(|s| !s.is_empty());
    let match_count = clamp_match_count(limit, config);

    let embedding = embeddings.embed(query).await?;
    let matches = storage
        .match_chunks(&embedding, match_count, source)
        .await?;
    debug!(query, match_count, found = matches.len(), "rag query");

    let results: Vec<Value> = matches
        .iter()
        .map(|m| {
            json!({
                "url": m.url,
                "content": truncate_excerpt(&m.content, config.excerpt_chars),
                "metadata": m.metadata,
                "similarity": m.similarity,
            })
        })
        .collect();

    Ok(json!({
        "query": query,
        "source_filter": source,
        "match_count": results.len(),
        "results": results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[test]
    fn clamps_match_count_into_range() {
        let c = config();
        assert_eq!(clamp_match_count(None, &c), 5);
        assert_eq!(clamp_match_count(Some(0), &c), 5);
        assert_eq!(clamp_match_count(Some(-3), &c), 5);
        assert_eq!(clamp_match_count(Some(51), &c), 5);
        assert_eq!(clamp_match_count(Some(999), &c), 5);
        assert_eq!(clamp_match_count(Some(1), &c), 1);
        assert_eq!(clamp_match_count(Some(50), &c), 50);
    }

    #[test]
    fn truncates_long_excerpts_on_char_boundaries() {
        assert_eq!(truncate_excerpt("short", 1000), "short");
        let long = "é".repeat(1200);
        let excerpt = truncate_excerpt(&long, 1000);
        assert_eq!(excerpt.chars().count(), 1003); // 1000 chars + "..."
        assert!(excerpt.ends_with("..."));
    }

    #[test]
    fn exact_length_is_not_truncated() {
        let text = "x".repeat(1000);
        assert_eq!(truncate_excerpt(&text, 1000), text);
    }
}
