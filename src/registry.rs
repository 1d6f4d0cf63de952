//! Source registry: idempotent upsert of aggregate rows.
//!
//! Every ingested origin is grouped under a source key derived from
//! its location (the URL host for web content, a `local:` prefix for
//! filesystem roots). Upserting is check-then-act over the gateway:
//! read, then PATCH or POST, with a POST conflict falling back to
//! PATCH so concurrent writers converge. A verification read after the
//! write confirms the row actually exists; a missing row after upsert
//! is an error the caller must report, not swallow.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::models::Source;
use crate::storage::StorageGateway;

/// How a new word count combines with an existing registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPolicy {
    /// Add to the stored total (incremental batch and crawl runs).
    Accumulate,
    /// Overwrite the stored total (whole-corpus re-ingestion).
    Replace,
}

/// Derive the registry key for an ingestion root.
///
/// URLs key by host; anything else is treated as a filesystem path and
/// keyed by its final component under a `local:` prefix.
pub fn derive_source_key(location: &str) -> String {
    if let Ok(url) = Url::parse(location) {
        if let Some(host) = url.host_str() {
            return host.to_string();
        }
    }
    let name = std::path::Path::new(location)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.trim_matches('/').to_string());
    format!("local:{name}")
}

/// Create or update the registry row for `source_id`, then verify it.
pub async fn upsert_source(
    storage: &Arc<StorageGateway>,
    source_id: &str,
    summary: &str,
    word_count: u64,
    policy: UpsertPolicy,
) -> Result<Source> {
    let existing = storage.get_source(source_id).await?;

    match existing {
        Some(mut row) => {
            row.summary = summary.to_string();
            row.total_word_count = match policy {
                UpsertPolicy::Accumulate => row.total_word_count + word_count,
                UpsertPolicy::Replace => word_count,
            };
            storage.update_source(&row).await?;
            debug!(source_id, total = row.total_word_count, "updated source row");
        }
        None => {
            let row = Source {
                source_id: source_id.to_string(),
                summary: summary.to_string(),
                total_word_count: word_count,
                created_at: String::new(),
                updated_at: String::new(),
            };
            match storage.insert_source(&row).await {
                Ok(_) => debug!(source_id, "created source row"),
                // A concurrent writer won the insert; fold into theirs.
                Err(Error::Storage { status: 409, .. }) => {
                    warn!(source_id, "source insert conflict, updating instead");
                    if let Some(mut current) = storage.get_source(source_id).await? {
                        current.summary = summary.to_string();
                        current.total_word_count = match policy {
                            UpsertPolicy::Accumulate => current.total_word_count + word_count,
                            UpsertPolicy::Replace => word_count,
                        };
                        storage.update_source(&current).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    // The write path returns empty bodies; only a read proves the row
    // is actually there.
    storage.get_source(source_id).await?.ok_or_else(|| {
        Error::storage(
            200,
            format!("source {source_id} missing after upsert"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    use crate::config::StorageConfig;

    fn gateway(server: &MockServer) -> Arc<StorageGateway> {
        Arc::new(
            StorageGateway::new(&StorageConfig {
                base_url: server.base_url(),
                token: None,
            })
            .unwrap(),
        )
    }

    #[test]
    fn urls_key_by_host() {
        assert_eq!(
            derive_source_key("https://docs.example.com/en/latest/"),
            "docs.example.com"
        );
        assert_eq!(
            derive_source_key("https://docs.example.com/sitemap.xml"),
            "docs.example.com"
        );
    }

    #[test]
    fn paths_key_by_final_component() {
        assert_eq!(derive_source_key("/srv/corpus/docs"), "local:docs");
        assert_eq!(derive_source_key("notes.md"), "local:notes.md");
        assert_eq!(derive_source_key("./guides/"), "local:guides");
    }

    #[tokio::test]
    async fn existing_row_takes_update_path() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET)
                .path("/sources")
                .query_param("source_id", "eq.local:docs");
            then.status(200).json_body(json!([{
                "source_id": "local:docs",
                "summary": "docs",
                "total_word_count": 40
            }]));
        }).await;
        let insert = server.mock_async(|when, then| {
            when.method(POST).path("/sources");
            then.status(201);
        }).await;
        let patch = server.mock_async(|when, then| {
            when.method(PATCH).path("/sources");
            then.status(204);
        }).await;

        let result = upsert_source(&gateway(&server), "local:docs", "docs", 40, UpsertPolicy::Replace)
            .await
            .unwrap();
        assert_eq!(result.source_id, "local:docs");
        assert_eq!(insert.hits_async().await, 0);
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn accumulate_adds_to_existing_total() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET)
                .path("/sources")
                .query_param("source_id", "eq.docs.example.com");
            then.status(200).json_body(json!([{
                "source_id": "docs.example.com",
                "summary": "old",
                "total_word_count": 100
            }]));
        }).await;
        let patch = server.mock_async(|when, then| {
            when.method(PATCH)
                .path("/sources")
                .json_body_partial(r#"{ "total_word_count": 150 }"#);
            then.status(204);
        }).await;

        upsert_source(
            &gateway(&server),
            "docs.example.com",
            "new summary",
            50,
            UpsertPolicy::Accumulate,
        )
        .await
        .unwrap();
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn replace_overwrites_existing_total() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET)
                .path("/sources")
                .query_param("source_id", "eq.docs.example.com");
            then.status(200).json_body(json!([{
                "source_id": "docs.example.com",
                "summary": "old",
                "total_word_count": 100
            }]));
        }).await;
        let patch = server.mock_async(|when, then| {
            when.method(PATCH)
                .path("/sources")
                .json_body_partial(r#"{ "total_word_count": 50 }"#);
            then.status(204);
        }).await;

        upsert_source(
            &gateway(&server),
            "docs.example.com",
            "s",
            50,
            UpsertPolicy::Replace,
        )
        .await
        .unwrap();
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn missing_row_after_upsert_is_an_error() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET).path("/sources");
            then.status(200).json_body(json!([]));
        }).await;
        server.mock_async(|when, then| {
            when.method(POST).path("/sources");
            then.status(201);
        }).await;

        let err = upsert_source(&gateway(&server), "ghost", "s", 1, UpsertPolicy::Replace)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing after upsert"));
    }
}
