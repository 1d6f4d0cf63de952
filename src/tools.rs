//! Tool surface for agent access.
//!
//! Every pipeline capability is exposed as a named tool with a JSON
//! Schema, discoverable via `GET /tools/list` and invocable via
//! `POST /tools/{name}`. The same tools back the CLI subcommands, so
//! agents and humans run identical code paths.
//!
//! # Result contract
//!
//! A tool invocation never propagates an error to the transport. Each
//! tool's inner logic returns `Result<Value>`; [`Tool::execute`] wraps
//! it so the caller always receives a JSON object:
//!
//! ```json
//! { "success": true,  ... }
//! { "success": false, "error": "..." }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

use crate::config::Config;
use crate::crawler::WebCrawler;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::ingest::Pipeline;
use crate::query::rag_query;
use crate::storage::StorageGateway;

/// Shared state handed to every tool invocation.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub storage: Arc<StorageGateway>,
    /// Absent when the embedding service is unconfigured; tools that
    /// need vectors fail with a configuration error, the rest work.
    pub embeddings: Option<Arc<EmbeddingClient>>,
    pub pipeline: Pipeline,
    pub crawler: WebCrawler,
}

impl ToolContext {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let storage = Arc::new(StorageGateway::new(&config.storage)?);
        let embeddings = if config.embedding.is_configured() {
            Some(Arc::new(EmbeddingClient::new(&config.embedding)?))
        } else {
            None
        };
        let pipeline = Pipeline::new(
            Arc::clone(&config),
            Arc::clone(&storage),
            embeddings.clone(),
        );
        let crawler = WebCrawler::new(&config.ingest)?;
        Ok(Self {
            config,
            storage,
            embeddings,
            pipeline,
            crawler,
        })
    }

    fn embeddings(&self) -> Result<&Arc<EmbeddingClient>> {
        self.embeddings.as_ref().ok_or_else(|| {
            Error::Configuration("embedding service is not configured".into())
        })
    }
}

/// A named capability exposed to agents.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route path (`POST /tools/{name}`); lowercase with underscores.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Always returns a structured result object; errors
    /// surface as `{ "success": false, "error": ... }`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Value {
        match self.run(params, ctx).await {
            Ok(value) => succeed(value),
            Err(e) => {
                error!(tool = self.name(), error = %e, "tool failed");
                failure(&e.to_string())
            }
        }
    }

    /// Tool logic proper. Implementations return errors freely; the
    /// default [`execute`](Tool::execute) turns them into the wire shape.
    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

fn succeed(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        map.insert("success".into(), json!(true));
        return value;
    }
    json!({ "success": true, "result": value })
}

/// The uniform failure shape, also used for transport-level timeouts.
pub fn failure(message: &str) -> Value {
    json!({ "success": false, "error": message })
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation(format!("{key} is required")))
}

// ═══════════════════════════════════════════════════════════════════════
// Crawling tools
// ═══════════════════════════════════════════════════════════════════════

/// Fetch one page and ingest it, without following links.
pub struct CrawlSinglePageTool;

#[async_trait]
impl Tool for CrawlSinglePageTool {
    fn name(&self) -> &str {
        "crawl_single_page"
    }

    fn description(&self) -> &str {
        "Crawl a single web page and store its content for retrieval"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Page URL to crawl" }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let url = require_str(&params, "url")?;
        let page = ctx.crawler.fetch_page(url).await?;
        if page.text.trim().is_empty() {
            return Err(Error::Crawl(format!("no text content at {url}")));
        }
        let report = ctx.pipeline.ingest_pages(url, &[page]).await?;
        let mut value = serde_json::to_value(&report)
            .map_err(|e| Error::Validation(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.insert("url".into(), json!(url));
        }
        Ok(value)
    }
}

/// Crawl a URL according to its kind: sitemap entries in parallel,
/// text files directly, webpages breadth-first through internal links.
pub struct SmartCrawlTool;

#[async_trait]
impl Tool for SmartCrawlTool {
    fn name(&self) -> &str {
        "smart_crawl_url"
    }

    fn description(&self) -> &str {
        "Crawl a site, sitemap, or text file and store everything found"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Start URL, sitemap, or .txt file" },
                "max_depth": { "type": "integer", "description": "Link-following depth for webpages", "default": 3 },
                "max_concurrent": { "type": "integer", "description": "Parallel fetch bound", "default": 10 }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let url = require_str(&params, "url")?;

        // Per-call overrides without touching the shared crawler.
        let mut ingest = ctx.config.ingest.clone();
        if let Some(depth) = params.get("max_depth").and_then(Value::as_u64) {
            ingest.max_depth = depth as usize;
        }
        if let Some(conc) = params.get("max_concurrent").and_then(Value::as_u64) {
            ingest.max_concurrent_crawl = conc as usize;
        }
        let crawler = WebCrawler::new(&ingest)?;

        let pages = crawler.smart_crawl(url).await?;
        let report = ctx.pipeline.ingest_pages(url, &pages).await?;
        let mut value = serde_json::to_value(&report)
            .map_err(|e| Error::Validation(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.insert("url".into(), json!(url));
            map.insert("pages_crawled".into(), json!(pages.len()));
        }
        Ok(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Local ingestion tools
// ═══════════════════════════════════════════════════════════════════════

/// Resumable batch ingestion of a local directory.
pub struct CrawlLocalFilesBatchTool;

#[async_trait]
impl Tool for CrawlLocalFilesBatchTool {
    fn name(&self) -> &str {
        "crawl_local_files_batch"
    }

    fn description(&self) -> &str {
        "Ingest one batch of local documentation files, resumable via start_from"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory (or single file) to ingest" },
                "batch_size": { "type": "integer", "description": "Files per invocation", "default": 10 },
                "start_from": { "type": "string", "description": "File path from a previous report's next_file" },
                "recursive": { "type": "boolean", "default": true },
                "extensions": { "type": "string", "description": "Comma-separated extension filter, e.g. \".md,.rst\"" }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = require_str(&params, "path")?;
        let batch_size = params
            .get("batch_size")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(ctx.config.ingest.batch_size);
        let start_from = params.get("start_from").and_then(Value::as_str);
        let recursive = params
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let extensions = params.get("extensions").and_then(Value::as_str);

        let report = ctx
            .pipeline
            .ingest_local_batch(
                std::path::Path::new(path),
                batch_size,
                start_from,
                recursive,
                extensions,
            )
            .await?;
        serde_json::to_value(&report).map_err(|e| Error::Validation(e.to_string()))
    }
}

/// Whole-corpus ingestion in one call.
pub struct CrawlLocalFilesTool;

#[async_trait]
impl Tool for CrawlLocalFilesTool {
    fn name(&self) -> &str {
        "crawl_local_files"
    }

    fn description(&self) -> &str {
        "Ingest an entire local documentation directory in one run"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory (or single file) to ingest" },
                "recursive": { "type": "boolean", "default": true },
                "extensions": { "type": "string", "description": "Comma-separated extension filter, e.g. \".md,.rst\"" }
            },
            "required": ["path"]
        })
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = require_str(&params, "path")?;
        let recursive = params
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let extensions = params.get("extensions").and_then(Value::as_str);
        let report = ctx
            .pipeline
            .ingest_local_all(std::path::Path::new(path), recursive, extensions)
            .await?;
        serde_json::to_value(&report).map_err(|e| Error::Validation(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Retrieval and registry tools
// ═══════════════════════════════════════════════════════════════════════

/// List every registered source with its aggregates.
pub struct GetAvailableSourcesTool;

#[async_trait]
impl Tool for GetAvailableSourcesTool {
    fn name(&self) -> &str {
        "get_available_sources"
    }

    fn description(&self) -> &str {
        "List all ingested sources with summaries and word counts"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let sources = ctx.storage.list_sources().await?;
        Ok(json!({
            "count": sources.len(),
            "sources": sources,
        }))
    }
}

/// Similarity search over the stored chunks.
pub struct PerformRagQueryTool;

#[async_trait]
impl Tool for PerformRagQueryTool {
    fn name(&self) -> &str {
        "perform_rag_query"
    }

    fn description(&self) -> &str {
        "Run a semantic search over stored documentation chunks"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language query" },
                "source": { "type": "string", "description": "Restrict to one source_id" },
                "match_count": { "type": "integer", "description": "Results to return (1-50)", "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = require_str(&params, "query")?;
        let source = params.get("source").and_then(Value::as_str);
        let limit = params.get("match_count").and_then(Value::as_i64);
        rag_query(
            ctx.embeddings()?,
            &ctx.storage,
            &ctx.config.retrieval,
            query,
            source,
            limit,
        )
        .await
    }
}

/// Remove a source and all of its chunks.
pub struct DeleteSourceTool;

#[async_trait]
impl Tool for DeleteSourceTool {
    fn name(&self) -> &str {
        "delete_source"
    }

    fn description(&self) -> &str {
        "Delete a source and every chunk stored under it"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_id": { "type": "string", "description": "Source identifier to delete" }
            },
            "required": ["source_id"]
        })
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let source_id = require_str(&params, "source_id")?;
        // Chunks first: a failure here leaves the registry row as a
        // marker that cleanup is incomplete.
        ctx.storage.delete_chunks_for_source(source_id).await?;
        ctx.storage.delete_source(source_id).await?;
        Ok(json!({ "source_id": source_id, "deleted": true }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Holds every registered tool; shared by the server and the CLI.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the full built-in tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CrawlSinglePageTool));
        registry.register(Box::new(SmartCrawlTool));
        registry.register(Box::new(CrawlLocalFilesTool));
        registry.register(Box::new(CrawlLocalFilesBatchTool));
        registry.register(Box::new(GetAvailableSourcesTool));
        registry.register(Box::new(PerformRagQueryTool));
        registry.register(Box::new(DeleteSourceTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Discovery payload for `GET /tools/list`.
    pub fn describe(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn context() -> ToolContext {
        ToolContext::new(Arc::new(Config::default())).unwrap()
    }

    #[test]
    fn builtin_registry_holds_the_full_tool_set() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 7);

        let names: HashSet<&str> = registry.tools().iter().map(|t| t.name()).collect();
        for expected in [
            "crawl_single_page",
            "smart_crawl_url",
            "crawl_local_files",
            "crawl_local_files_batch",
            "get_available_sources",
            "perform_rag_query",
            "delete_source",
        ] {
            assert!(names.contains(expected), "missing tool {expected}");
        }
    }

    #[test]
    fn every_schema_is_an_object_schema() {
        for tool in ToolRegistry::with_builtins().tools() {
            let schema = tool.parameters_schema();
            assert_eq!(schema["type"], "object", "{}", tool.name());
            assert!(schema["properties"].is_object(), "{}", tool.name());
        }
    }

    #[tokio::test]
    async fn missing_required_parameter_is_a_structured_failure() {
        let ctx = context();
        let registry = ToolRegistry::with_builtins();
        let tool = registry.find("crawl_single_page").unwrap();

        let result = tool.execute(json!({}), &ctx).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("url"));
    }

    #[tokio::test]
    async fn rag_query_without_embeddings_fails_cleanly() {
        let ctx = context(); // default config: embeddings unconfigured
        let registry = ToolRegistry::with_builtins();
        let tool = registry.find("perform_rag_query").unwrap();

        let result = tool.execute(json!({ "query": "how do I deploy" }), &ctx).await;
        assert_eq!(result["success"], false);
        assert!(result["error"]
            .as_str()
            .unwrap()
            .contains("not configured"));
    }

    #[test]
    fn failure_shape_is_uniform() {
        let value = failure("boom");
        assert_eq!(value, json!({ "success": false, "error": "boom" }));
    }
}
