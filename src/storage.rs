//! PostgREST storage gateway.
//!
//! Thin HTTP layer over the persistence backend (a PostgREST endpoint,
//! typically Supabase). Two tables and one RPC are used:
//!
//! | route                       | purpose                              |
//! |-----------------------------|--------------------------------------|
//! | `/sources`                  | one registry row per ingestion root  |
//! | `/crawled_pages`            | chunk rows with embeddings           |
//! | `/rpc/match_crawled_pages`  | vector similarity search             |
//!
//! All success statuses the backend emits (200, 201, 204) are
//! normalized to a JSON value; a 204 or an empty body becomes `{}` so
//! callers never branch on status codes.

use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::models::{RagMatch, Source, StoredChunk};

/// Client for the PostgREST persistence backend.
pub struct StorageGateway {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl StorageGateway {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Configuration("storage.base_url is required".into()));
        }
        let http = reqwest::Client::new();
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Send one request and normalize the response.
    ///
    /// 200/201/204 are success; an empty body maps to `{}`. Everything
    /// else surfaces as [`Error::Storage`] with the body preserved.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url).query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token).header("apikey", token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::storage(0, e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::storage(status, e.to_string()))?;

        debug!(%method, path, status, "storage request");

        if !matches!(status, 200 | 201 | 204) {
            return Err(Error::storage(status, text));
        }
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text).map_err(|e| Error::storage(status, format!("bad JSON: {e}")))
    }

    // ── Sources ─────────────────────────────────────────────────────

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let value = self
            .request(Method::GET, "/sources", &[("order", "source_id")], None)
            .await?;
        serde_json::from_value(value).map_err(|e| Error::storage(200, e.to_string()))
    }

    /// Fetch a single registry row, `None` when absent.
    pub async fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let filter = format!("eq.{source_id}");
        let value = self
            .request(Method::GET, "/sources", &[("source_id", &filter)], None)
            .await?;
        let mut rows: Vec<Source> =
            serde_json::from_value(value).map_err(|e| Error::storage(200, e.to_string()))?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    pub async fn insert_source(&self, source: &Source) -> Result<Value> {
        let body = json!({
            "source_id": source.source_id,
            "summary": source.summary,
            "total_word_count": source.total_word_count,
        });
        self.request(Method::POST, "/sources", &[], Some(&body))
            .await
    }

    pub async fn update_source(&self, source: &Source) -> Result<Value> {
        let filter = format!("eq.{}", source.source_id);
        let body = json!({
            "summary": source.summary,
            "total_word_count": source.total_word_count,
        });
        self.request(
            Method::PATCH,
            "/sources",
            &[("source_id", &filter)],
            Some(&body),
        )
        .await
    }

    pub async fn delete_source(&self, source_id: &str) -> Result<Value> {
        let filter = format!("eq.{source_id}");
        self.request(Method::DELETE, "/sources", &[("source_id", &filter)], None)
            .await
    }

    // ── Chunks ──────────────────────────────────────────────────────

    pub async fn insert_chunk(&self, chunk: &StoredChunk) -> Result<Value> {
        let body = serde_json::to_value(chunk)
            .map_err(|e| Error::Validation(format!("unserializable chunk: {e}")))?;
        self.request(Method::POST, "/crawled_pages", &[], Some(&body))
            .await
    }

    /// Remove every chunk row for one origin document. Re-ingestion
    /// replaces rather than appends.
    pub async fn delete_chunks_for_origin(&self, url: &str) -> Result<Value> {
        let filter = format!("eq.{url}");
        self.request(Method::DELETE, "/crawled_pages", &[("url", &filter)], None)
            .await
    }

    pub async fn delete_chunks_for_source(&self, source_id: &str) -> Result<Value> {
        let filter = format!("eq.{source_id}");
        self.request(
            Method::DELETE,
            "/crawled_pages",
            &[("source_id", &filter)],
            None,
        )
        .await
    }

    /// Vector similarity search via the `match_crawled_pages` RPC.
    /// `source_filter` restricts matches to one source when present.
    pub async fn match_chunks(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<RagMatch>> {
        let filter = match source_filter {
            Some(source) => json!({ "source": source }),
            None => json!({}),
        };
        let body = json!({
            "query_embedding": query_embedding,
            "match_count": match_count,
            "filter": filter,
        });
        let value = self
            .request(Method::POST, "/rpc/match_crawled_pages", &[], Some(&body))
            .await?;
        serde_json::from_value(value).map_err(|e| Error::storage(200, e.to_string()))
    }
}
