//! Remote embedding client.
//!
//! Converts text into fixed-dimension vectors through an AI Core-style
//! inference deployment. Two backend shapes are supported behind one
//! interface and chosen once at construction time:
//!
//! - **Direct**: `POST {input, model}` → `{data: [{embedding}], usage}`.
//! - **Orchestration**: the request is wrapped in a config envelope and
//!   the response may be nested under `final_result`, with vectors
//!   under `data[].embedding` or `embeddings`. Preferred when both
//!   deployments are configured.
//!
//! Authentication is an OAuth2 client-credentials exchange. The bearer
//! token lives in a cache owned by this client (no process-global
//! state) and is reused until shortly before expiry; a 401 mid-request
//! invalidates it and triggers exactly one re-authentication before
//! the error surfaces.
//!
//! # Retry strategy
//!
//! Transient failures (network errors, HTTP 429/5xx) are retried up to
//! the configured budget with exponential backoff (`base * 2^attempt`).
//! Other 4xx responses fail immediately.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Reuse a token only while `now < expires_at - margin`.
const TOKEN_SAFETY_MARGIN_SECS: u64 = 300;

/// Which inference deployment shape this client talks to. Decided once
/// from configuration, never re-decided per call.
#[derive(Debug, Clone)]
enum Backend {
    Direct { deployment_id: String },
    Orchestration { deployment_id: String },
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Client for the remote embedding service.
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    auth_url: String,
    client_id: String,
    client_secret: String,
    resource_group: String,
    backend: Backend,
    model: String,
    dimensions: usize,
    max_retries: u32,
    backoff_base: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl EmbeddingClient {
    /// Build a client from configuration.
    ///
    /// Fails with a configuration error when credentials are missing or
    /// neither deployment identifier is set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = required(&config.base_url, "embedding.base_url")?;
        let auth_url = required(&config.auth_url, "embedding.auth_url")?;
        let client_id = required(&config.client_id, "embedding.client_id")?;
        let client_secret = required(&config.client_secret, "embedding.client_secret")?;

        let backend = match (
            &config.orchestration_deployment_id,
            &config.embedding_deployment_id,
        ) {
            (Some(id), _) => Backend::Orchestration {
                deployment_id: id.clone(),
            },
            (None, Some(id)) => Backend::Direct {
                deployment_id: id.clone(),
            },
            (None, None) => {
                return Err(Error::Configuration(
                    "no embedding deployment configured; set \
                     embedding.orchestration_deployment_id or \
                     embedding.embedding_deployment_id"
                        .into(),
                ))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            resource_group: config.resource_group.clone(),
            backend,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            token: Mutex::new(None),
        })
    }

    /// Declared output dimensionality; every returned vector has
    /// exactly this length.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Which backend shape is active: `"direct"` or `"orchestration"`.
    pub fn backend_kind(&self) -> &'static str {
        match self.backend {
            Backend::Direct { .. } => "direct",
            Backend::Orchestration { .. } => "orchestration",
        }
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingService("empty embedding response".into()))
    }

    /// Embed a batch of texts, returning one vector per input in order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint();
        let payload = self.payload(texts);

        let mut reauthenticated = false;
        let mut last_err: Option<Error> = None;

        let mut attempt = 0u32;
        while attempt < self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let token = self.token().await?;
            let response = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .header("AI-Resource-Group", &self.resource_group)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await.map_err(|e| {
                        Error::EmbeddingService(format!("invalid JSON response: {e}"))
                    })?;
                    let vectors = self.parse_vectors(&body)?;
                    debug!(
                        count = vectors.len(),
                        dimensions = self.dimensions,
                        backend = self.backend_kind(),
                        "generated embeddings"
                    );
                    return Ok(vectors);
                }
                Ok(resp) if resp.status().as_u16() == 401 => {
                    // Force re-auth exactly once; a second 401 means the
                    // credentials themselves are bad.
                    if reauthenticated {
                        return Err(Error::Authentication(
                            "embedding request rejected (401) after re-authentication".into(),
                        ));
                    }
                    warn!("embedding request got 401; refreshing token");
                    self.invalidate_token().await;
                    reauthenticated = true;
                    // Does not consume a transient-retry attempt.
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "transient embedding failure; will retry");
                        last_err = Some(Error::EmbeddingService(format!(
                            "HTTP {status}: {body}"
                        )));
                    } else {
                        return Err(Error::EmbeddingService(format!("HTTP {status}: {body}")));
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request error; will retry");
                    last_err = Some(Error::EmbeddingService(e.to_string()));
                }
            }

            attempt += 1;
        }

        Err(last_err.unwrap_or_else(|| {
            Error::EmbeddingService("embedding failed after retries".into())
        }))
    }

    fn endpoint(&self) -> String {
        match &self.backend {
            Backend::Direct { deployment_id } => format!(
                "{}/v2/inference/deployments/{}/embeddings",
                self.base_url, deployment_id
            ),
            Backend::Orchestration { deployment_id } => format!(
                "{}/v2/inference/deployments/{}/v2/embeddings",
                self.base_url, deployment_id
            ),
        }
    }

    fn payload(&self, texts: &[String]) -> Value {
        match &self.backend {
            Backend::Direct { .. } => json!({
                "input": texts,
                "model": self.model,
            }),
            Backend::Orchestration { .. } => {
                let input: Value = if texts.len() == 1 {
                    json!({ "text": texts[0] })
                } else {
                    json!({ "text": texts })
                };
                json!({
                    "input": input,
                    "config": {
                        "modules": {
                            "embeddings": {
                                "model": {
                                    "name": self.model,
                                    "params": { "dimensions": self.dimensions }
                                }
                            }
                        }
                    }
                })
            }
        }
    }

    /// Extract vectors from either backend's response shape and enforce
    /// the declared dimensionality. A missing or mis-sized vector is a
    /// hard failure, never a silent zero-fill.
    fn parse_vectors(&self, body: &Value) -> Result<Vec<Vec<f32>>> {
        let root = match &self.backend {
            Backend::Direct { .. } => body,
            Backend::Orchestration { .. } => body.get("final_result").unwrap_or(body),
        };

        let raw: Vec<&Value> = if let Some(data) = root.get("data").and_then(Value::as_array) {
            data.iter()
                .map(|item| {
                    item.get("embedding").ok_or_else(|| {
                        Error::EmbeddingService("response item missing embedding".into())
                    })
                })
                .collect::<Result<_>>()?
        } else if let Some(embeddings) = root.get("embeddings").and_then(Value::as_array) {
            embeddings.iter().collect()
        } else {
            return Err(Error::EmbeddingService(
                "response has neither data nor embeddings".into(),
            ));
        };

        raw.into_iter().map(|v| self.parse_vector(v)).collect()
    }

    fn parse_vector(&self, value: &Value) -> Result<Vec<f32>> {
        let array = value
            .as_array()
            .ok_or_else(|| Error::EmbeddingService("embedding is not an array".into()))?;
        let vector: Vec<f32> = array
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| Error::EmbeddingService("non-numeric embedding value".into()))
            })
            .collect::<Result<_>>()?;
        if vector.len() != self.dimensions {
            return Err(Error::EmbeddingService(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }

    // ── Token handling ──────────────────────────────────────────────

    /// Return a valid bearer token, exchanging credentials if the
    /// cached one is absent or expiring. The lock ensures at most one
    /// exchange is in flight at a time.
    async fn token(&self) -> Result<String> {
        let mut cache = self.token.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }
        let fresh = self.exchange_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn exchange_token(&self) -> Result<CachedToken> {
        let url = format!("{}/oauth/token", self.auth_url);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let mut last_err: Option<String> = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            match self.http.post(&url).form(&form).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await.map_err(|e| {
                        Error::Authentication(format!("invalid token response: {e}"))
                    })?;
                    let token = body
                        .get("access_token")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            Error::Authentication("token response missing access_token".into())
                        })?
                        .to_string();
                    let expires_in = body
                        .get("expires_in")
                        .and_then(Value::as_u64)
                        .unwrap_or(3600);
                    // 5-minute safety margin for long-lived tokens;
                    // short TTLs keep 90% of their lifetime instead.
                    let margin = if expires_in > TOKEN_SAFETY_MARGIN_SECS * 2 {
                        TOKEN_SAFETY_MARGIN_SECS
                    } else {
                        expires_in / 10
                    };
                    info!("obtained embedding service access token");
                    return Ok(CachedToken {
                        token,
                        expires_at: Instant::now()
                            + Duration::from_secs(expires_in.saturating_sub(margin)),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(%status, attempt, "token exchange failed");
                    last_err = Some(format!("HTTP {status}: {body}"));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "token exchange request error");
                    last_err = Some(e.to_string());
                }
            }
        }

        Err(Error::Authentication(
            last_err.unwrap_or_else(|| "token exchange failed".into()),
        ))
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| Error::Configuration(format!("{name} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: Some(server.base_url()),
            auth_url: Some(server.base_url()),
            client_id: Some("cid".into()),
            client_secret: Some("secret".into()),
            embedding_deployment_id: Some("dep-direct".into()),
            orchestration_deployment_id: None,
            dimensions: 4,
            max_retries: 2,
            backoff_base_ms: 1,
            ..EmbeddingConfig::default()
        }
    }

    async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock_async(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200)
                .json_body(serde_json::json!({ "access_token": "tok-1", "expires_in": 3600 }));
        }).await
    }

    #[test]
    fn requires_a_deployment_id() {
        let config = EmbeddingConfig {
            base_url: Some("http://x".into()),
            auth_url: Some("http://x".into()),
            client_id: Some("cid".into()),
            client_secret: Some("secret".into()),
            ..EmbeddingConfig::default()
        };
        let err = EmbeddingClient::new(&config).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn requires_credentials() {
        let config = EmbeddingConfig {
            embedding_deployment_id: Some("dep".into()),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            EmbeddingClient::new(&config).err().unwrap(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn prefers_orchestration_when_both_configured() {
        let config = EmbeddingConfig {
            base_url: Some("http://x".into()),
            auth_url: Some("http://x".into()),
            client_id: Some("cid".into()),
            client_secret: Some("secret".into()),
            embedding_deployment_id: Some("dep-direct".into()),
            orchestration_deployment_id: Some("dep-orch".into()),
            ..EmbeddingConfig::default()
        };
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.backend_kind(), "orchestration");
    }

    #[tokio::test]
    async fn direct_backend_routes_to_direct_endpoint() {
        let server = MockServer::start_async().await;
        let token = mock_token(&server).await;
        let embed = server.mock_async(|when, then| {
            when.method(POST)
                .path("/v2/inference/deployments/dep-direct/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [ { "embedding": [0.1, 0.2, 0.3, 0.4] } ],
                "usage": { "total_tokens": 3 }
            }));
        }).await;

        let client = EmbeddingClient::new(&test_config(&server)).unwrap();
        assert_eq!(client.backend_kind(), "direct");
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 4);
        embed.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn orchestration_backend_unwraps_final_result() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        let embed = server.mock_async(|when, then| {
            when.method(POST)
                .path("/v2/inference/deployments/dep-orch/v2/embeddings");
            then.status(200).json_body(serde_json::json!({
                "final_result": {
                    "data": [ { "embedding": [1.0, 2.0, 3.0, 4.0] } ]
                }
            }));
        }).await;

        let mut config = test_config(&server);
        config.orchestration_deployment_id = Some("dep-orch".into());
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.backend_kind(), "orchestration");
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector, vec![1.0, 2.0, 3.0, 4.0]);
        embed.assert_async().await;
    }

    #[tokio::test]
    async fn token_is_cached_across_calls() {
        let server = MockServer::start_async().await;
        let token = mock_token(&server).await;
        server.mock_async(|when, then| {
            when.method(POST)
                .path("/v2/inference/deployments/dep-direct/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [ { "embedding": [0.0, 0.0, 0.0, 0.0] } ]
            }));
        }).await;

        let client = EmbeddingClient::new(&test_config(&server)).unwrap();
        client.embed("one").await.unwrap();
        client.embed("two").await.unwrap();
        assert_eq!(token.hits_async().await, 1);
    }

    #[tokio::test]
    async fn unauthorized_triggers_exactly_one_reauth() {
        let server = MockServer::start_async().await;
        let token = mock_token(&server).await;
        let embed = server.mock_async(|when, then| {
            when.method(POST)
                .path("/v2/inference/deployments/dep-direct/embeddings");
            then.status(401).body("expired");
        }).await;

        let client = EmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        // Initial request plus the single post-reauth retry.
        assert_eq!(embed.hits_async().await, 2);
        assert_eq!(token.hits_async().await, 2);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retry_budget() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        let embed = server.mock_async(|when, then| {
            when.method(POST)
                .path("/v2/inference/deployments/dep-direct/embeddings");
            then.status(500).body("boom");
        }).await;

        let client = EmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(_)));
        assert_eq!(embed.hits_async().await, 2); // max_retries = 2
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_hard_failure() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        server.mock_async(|when, then| {
            when.method(POST)
                .path("/v2/inference/deployments/dep-direct/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [ { "embedding": [0.1, 0.2] } ]
            }));
        }).await;

        let client = EmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("dimensions"));
    }

    #[tokio::test]
    async fn failed_token_exchange_is_authentication_error() {
        let server = MockServer::start_async().await;
        let token = server.mock_async(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(403).body("bad credentials");
        }).await;

        let client = EmbeddingClient::new(&test_config(&server)).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(token.hits_async().await, 2); // retried per budget
    }
}
