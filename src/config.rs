use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level application configuration.
///
/// Loaded from a TOML file; endpoint URLs and secrets can be supplied
/// or overridden through environment variables, so a bare `serve` with
/// a fully configured environment needs no file at all.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// PostgREST persistence backend.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_url")]
    pub base_url: String,
    /// Bearer token for the backend; usually supplied via
    /// `SUPABASE_SERVICE_KEY` / `POSTGREST_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: default_storage_url(),
            token: None,
        }
    }
}

fn default_storage_url() -> String {
    "http://localhost:3000".to_string()
}

/// Remote embedding provider (AI Core-style inference deployments).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_resource_group")]
    pub resource_group: String,
    /// Direct embedding deployment. Used when no orchestration
    /// deployment is configured.
    #[serde(default)]
    pub embedding_deployment_id: Option<String>,
    /// Orchestration deployment (config-envelope request shape).
    /// Preferred when both are present.
    #[serde(default)]
    pub orchestration_deployment_id: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Chat deployment/model are configuration surface only, reserved
    /// for completion use.
    #[serde(default)]
    pub chat_deployment_id: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_url: None,
            client_id: None,
            client_secret: None,
            resource_group: default_resource_group(),
            embedding_deployment_id: None,
            orchestration_deployment_id: None,
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            chat_deployment_id: None,
            chat_model: default_chat_model(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_resource_group() -> String {
    "default".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_dimensions() -> usize {
    1536
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// File-level concurrency bound for embed+store work.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Comma-separated extension filter for local discovery.
    #[serde(default = "default_extensions")]
    pub extensions: String,
    #[serde(default = "default_max_concurrent_crawl")]
    pub max_concurrent_crawl: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_files: default_max_concurrent_files(),
            extensions: default_extensions(),
            max_concurrent_crawl: default_max_concurrent_crawl(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_max_concurrent_files() -> usize {
    3
}
fn default_extensions() -> String {
    ".md,.txt,.html,.rst".to_string()
}
fn default_max_concurrent_crawl() -> usize {
    10
}
fn default_max_depth() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_count")]
    pub default_match_count: usize,
    #[serde(default = "default_max_match_count")]
    pub max_match_count: usize,
    /// Display safeguard: returned content is truncated to this many
    /// characters; storage is never truncated.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_match_count: default_match_count(),
            max_match_count: default_max_match_count(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_match_count() -> usize {
    5
}
fn default_max_match_count() -> usize {
    50
}
fn default_excerpt_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Wall-clock budget for one tool invocation. On expiry the call
    /// fails with a structured timeout result, not the process.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8051".to_string()
}
fn default_tool_timeout_secs() -> u64 {
    300
}

impl EmbeddingConfig {
    /// True when credentials and at least one deployment are present.
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
            && self.auth_url.is_some()
            && self.client_id.is_some()
            && self.client_secret.is_some()
            && (self.embedding_deployment_id.is_some()
                || self.orchestration_deployment_id.is_some())
    }
}

/// Load configuration from an optional TOML file, then apply
/// environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file: {}", p.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        _ => Config::default(),
    };

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Environment variables win over file values for endpoints and
/// secrets, matching how deployments inject them.
fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = env_first(&["POSTGREST_URL", "SUPABASE_URL"]) {
        config.storage.base_url = v;
    }
    if let Some(v) = env_first(&["POSTGREST_TOKEN", "SUPABASE_SERVICE_KEY"]) {
        config.storage.token = Some(v);
    }

    let e = &mut config.embedding;
    override_opt(&mut e.base_url, "SAP_BTP_AICORE_BASE_URL");
    override_opt(&mut e.auth_url, "SAP_BTP_AICORE_AUTH_URL");
    override_opt(&mut e.client_id, "SAP_BTP_AICORE_CLIENT_ID");
    override_opt(&mut e.client_secret, "SAP_BTP_AICORE_CLIENT_SECRET");
    override_opt(
        &mut e.embedding_deployment_id,
        "SAP_BTP_AICORE_EMBEDDING_DEPLOYMENT_ID",
    );
    override_opt(
        &mut e.orchestration_deployment_id,
        "SAP_BTP_AICORE_ORCHESTRATION_DEPLOYMENT_ID",
    );
    override_opt(&mut e.chat_deployment_id, "SAP_BTP_AICORE_CHAT_DEPLOYMENT_ID");
    if let Some(v) = env_nonempty("SAP_BTP_AICORE_RESOURCE_GROUP") {
        e.resource_group = v;
    }
    if let Some(v) = env_nonempty("SAP_BTP_AICORE_EMBEDDING_MODEL") {
        e.model = v;
    }
    if let Some(v) = env_nonempty("SAP_BTP_AICORE_CHAT_MODEL") {
        e.chat_model = v;
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    match std::env::var(name) {
        // Values pasted from shell exports sometimes keep their quotes.
        Ok(v) if !v.trim().is_empty() => Some(v.trim().trim_matches(['\'', '"']).to_string()),
        _ => None,
    }
}

fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| env_nonempty(n))
}

fn override_opt(slot: &mut Option<String>, name: &str) {
    if let Some(v) = env_nonempty(name) {
        *slot = Some(v);
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap,
            config.chunking.max_chars
        );
    }
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.max_concurrent_files == 0 {
        anyhow::bail!("ingest.max_concurrent_files must be > 0");
    }
    if config.embedding.dimensions == 0 {
        anyhow::bail!("embedding.dimensions must be > 0");
    }
    if config.retrieval.max_match_count == 0 {
        anyhow::bail!("retrieval.max_match_count must be > 0");
    }
    Ok(())
}
