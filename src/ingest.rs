//! Ingestion pipeline: documents in, embedded chunks out.
//!
//! Orchestrates discovery → chunking → embedding → storage for both
//! local files and crawled pages. Local ingestion is resumable: files
//! are processed in fixed-size batches over a deterministic ordering,
//! and each report names the next file so a caller can continue where
//! the previous invocation stopped.
//!
//! Re-ingesting an origin always replaces its chunk rows. Source
//! registry totals accumulate across incremental batches and crawls;
//! a whole-corpus run overwrites them.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::crawler::Page;
use crate::discover::enumerate_files;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::StoredChunk;
use crate::registry::{derive_source_key, upsert_source, UpsertPolicy};
use crate::storage::StorageGateway;

/// Terminal status of one ingestion invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Every discovered file has been handled; nothing remains.
    AllFilesProcessed,
    /// The batch finished but later files remain; resume from
    /// `next_file`.
    MoreFilesRemaining,
    /// A non-resumable run (crawl) completed.
    BatchCompleted,
}

/// Outcome summary returned by every ingestion operation.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub status: BatchStatus,
    pub source_id: String,
    pub total_files: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub chunks_stored: usize,
    pub chunks_failed: usize,
    pub word_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_file: Option<String>,
}

/// Per-document outcome from the store step.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentStats {
    pub chunks_stored: usize,
    pub chunks_failed: usize,
    pub word_count: u64,
}

pub struct Pipeline {
    config: Arc<Config>,
    storage: Arc<StorageGateway>,
    embeddings: Option<Arc<EmbeddingClient>>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<StorageGateway>,
        embeddings: Option<Arc<EmbeddingClient>>,
    ) -> Self {
        Self {
            config,
            storage,
            embeddings,
        }
    }

    fn embeddings(&self) -> Result<&Arc<EmbeddingClient>> {
        self.embeddings.as_ref().ok_or_else(|| {
            Error::Configuration("embedding service is not configured".into())
        })
    }

    /// Effective extension filter: a per-call override or the
    /// configured default.
    fn extensions(&self, overrides: Option<&str>) -> Vec<String> {
        parse_extensions(overrides.unwrap_or(&self.config.ingest.extensions))
    }

    /// Chunk, embed, and store one document, replacing any prior rows
    /// for the same origin first.
    pub async fn store_document(
        &self,
        origin_url: &str,
        source_id: &str,
        text: &str,
        base_metadata: &Value,
    ) -> Result<DocumentStats> {
        let chunks = chunk_text(
            text,
            self.config.chunking.max_chars,
            self.config.chunking.overlap,
        )?;
        let chunks: Vec<String> = chunks.into_iter().filter(|c| !c.trim().is_empty()).collect();
        if chunks.is_empty() {
            return Ok(DocumentStats::default());
        }

        let vectors = self.embeddings()?.embed_batch(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::EmbeddingService(format!(
                "got {} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        // Old rows go first so a re-run replaces instead of appending.
        self.storage.delete_chunks_for_origin(origin_url).await?;

        let chunk_count = chunks.len();
        let mut stats = DocumentStats {
            word_count: text.split_whitespace().count() as u64,
            ..DocumentStats::default()
        };

        for (index, (content, embedding)) in chunks.into_iter().zip(vectors).enumerate() {
            let mut metadata = base_metadata.clone();
            if let Some(map) = metadata.as_object_mut() {
                map.insert("chunk_index".into(), json!(index));
                map.insert("chunk_count".into(), json!(chunk_count));
                map.insert("word_count".into(), json!(content.split_whitespace().count()));
                map.insert("char_count".into(), json!(content.chars().count()));
            }
            let row = StoredChunk {
                url: origin_url.to_string(),
                chunk_number: index,
                content,
                metadata,
                source_id: source_id.to_string(),
                embedding: Some(embedding),
            };
            match self.storage.insert_chunk(&row).await {
                Ok(_) => stats.chunks_stored += 1,
                Err(e) => {
                    warn!(url = origin_url, chunk = index, error = %e, "chunk insert failed");
                    stats.chunks_failed += 1;
                }
            }
        }

        debug!(
            url = origin_url,
            stored = stats.chunks_stored,
            failed = stats.chunks_failed,
            "stored document"
        );
        Ok(stats)
    }

    /// Process one batch of local files, resuming from `start_from`
    /// when given. An unknown `start_from` restarts from the beginning
    /// with a warning rather than failing.
    pub async fn ingest_local_batch(
        &self,
        root: &Path,
        batch_size: usize,
        start_from: Option<&str>,
        recursive: bool,
        extensions: Option<&str>,
    ) -> Result<IngestReport> {
        let files = enumerate_files(root, recursive, &self.extensions(extensions))?;
        let source_id = derive_source_key(&root.to_string_lossy());

        if files.is_empty() {
            return Ok(empty_report(BatchStatus::AllFilesProcessed, &source_id));
        }

        let start = resolve_start_index(&files, start_from);
        let batch_size = batch_size.max(1);
        let batch_end = (start + batch_size).min(files.len());
        let batch = &files[start..batch_end];

        info!(
            source_id,
            total = files.len(),
            start,
            count = batch.len(),
            "ingesting local batch"
        );

        let mut report = self
            .process_files(batch, &source_id, files.len())
            .await;

        if batch_end >= files.len() {
            report.status = BatchStatus::AllFilesProcessed;
        } else {
            report.status = BatchStatus::MoreFilesRemaining;
            // Full path: basenames repeat across directories (readme.md
            // in every chapter), so a bare name cannot anchor a resume.
            report.next_file = Some(files[batch_end].display().to_string());
        }

        self.finish(report, root, UpsertPolicy::Accumulate).await
    }

    /// Process the whole corpus in one run, replacing the registry
    /// word count rather than adding to it.
    pub async fn ingest_local_all(
        &self,
        root: &Path,
        recursive: bool,
        extensions: Option<&str>,
    ) -> Result<IngestReport> {
        let files = enumerate_files(root, recursive, &self.extensions(extensions))?;
        let source_id = derive_source_key(&root.to_string_lossy());
        if files.is_empty() {
            return Ok(empty_report(BatchStatus::AllFilesProcessed, &source_id));
        }

        info!(source_id, total = files.len(), "ingesting full corpus");
        let mut report = self.process_files(&files, &source_id, files.len()).await;
        report.status = BatchStatus::AllFilesProcessed;
        self.finish(report, root, UpsertPolicy::Replace).await
    }

    /// Store a set of crawled pages under the source derived from the
    /// crawl origin.
    pub async fn ingest_pages(&self, origin: &str, pages: &[Page]) -> Result<IngestReport> {
        let source_id = derive_source_key(origin);
        if pages.is_empty() {
            return Ok(empty_report(BatchStatus::BatchCompleted, &source_id));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.ingest.max_concurrent_files.max(1)));
        let outcomes = join_all(pages.iter().map(|page| {
            let semaphore = Arc::clone(&semaphore);
            let source_id = source_id.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                let metadata = json!({ "url": page.url });
                Some(
                    self.store_document(&page.url, &source_id, &page.text, &metadata)
                        .await,
                )
            }
        }))
        .await;

        let mut report = empty_report(BatchStatus::BatchCompleted, &source_id);
        report.total_files = pages.len();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(stats) => {
                    report.files_processed += 1;
                    accumulate(&mut report, stats);
                }
                Err(e) => {
                    warn!(error = %e, "page ingestion failed");
                    report.files_failed += 1;
                }
            }
        }

        let summary = format!("Crawled documentation from {origin}");
        self.upsert(report, &summary, UpsertPolicy::Accumulate).await
    }

    async fn process_files(
        &self,
        files: &[std::path::PathBuf],
        source_id: &str,
        total_files: usize,
    ) -> IngestReport {
        let semaphore = Arc::new(Semaphore::new(self.config.ingest.max_concurrent_files.max(1)));
        let outcomes = join_all(files.iter().map(|path| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                Some(self.process_one_file(path, source_id).await)
            }
        }))
        .await;

        let mut report = empty_report(BatchStatus::BatchCompleted, source_id);
        report.total_files = total_files;
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(Some(stats)) => {
                    report.files_processed += 1;
                    accumulate(&mut report, stats);
                }
                Ok(None) => report.files_skipped += 1,
                Err(e) => {
                    warn!(error = %e, "file ingestion failed");
                    report.files_failed += 1;
                }
            }
        }
        report
    }

    /// `Ok(None)` means the file was skipped (empty or unreadable as
    /// text is a failure, empty content a skip).
    async fn process_one_file(
        &self,
        path: &Path,
        source_id: &str,
    ) -> Result<Option<DocumentStats>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))?;
        if text.trim().is_empty() {
            debug!(path = %path.display(), "skipping empty file");
            return Ok(None);
        }

        let url = format!("file://{}", path.display());
        let metadata = json!({
            "file_name": path.file_name().map(|n| n.to_string_lossy().into_owned()),
            "file_path": path.to_string_lossy(),
            "extension": path.extension().map(|e| e.to_string_lossy().into_owned()),
        });
        self.store_document(&url, source_id, &text, &metadata)
            .await
            .map(Some)
    }

    async fn finish(
        &self,
        report: IngestReport,
        root: &Path,
        policy: UpsertPolicy,
    ) -> Result<IngestReport> {
        let summary = format!("Local documentation from {}", root.display());
        self.upsert(report, &summary, policy).await
    }

    /// Registry failure after chunks were written must not be silent:
    /// the error carries what was already stored.
    async fn upsert(
        &self,
        report: IngestReport,
        summary: &str,
        policy: UpsertPolicy,
    ) -> Result<IngestReport> {
        if report.files_processed > 0 {
            if let Err(e) = upsert_source(
                &self.storage,
                &report.source_id,
                summary,
                report.word_count,
                policy,
            )
            .await
            {
                return Err(Error::storage(
                    0,
                    format!(
                        "stored {} chunks but failed to update source registry: {e}",
                        report.chunks_stored
                    ),
                ));
            }
        }
        Ok(report)
    }
}

fn empty_report(status: BatchStatus, source_id: &str) -> IngestReport {
    IngestReport {
        status,
        source_id: source_id.to_string(),
        total_files: 0,
        files_processed: 0,
        files_failed: 0,
        files_skipped: 0,
        chunks_stored: 0,
        chunks_failed: 0,
        word_count: 0,
        next_file: None,
    }
}

fn accumulate(report: &mut IngestReport, stats: DocumentStats) {
    report.chunks_stored += stats.chunks_stored;
    report.chunks_failed += stats.chunks_failed;
    report.word_count += stats.word_count;
}

/// Split the configured comma-separated extension list.
pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Map `start_from` to an index in the sorted file list. Matches the
/// full path exactly (what reports emit), with an exact file-name
/// match as a convenience for hand-typed resumes; a miss restarts from
/// zero.
fn resolve_start_index(files: &[std::path::PathBuf], start_from: Option<&str>) -> usize {
    let Some(name) = start_from.filter(|s| !s.trim().is_empty()) else {
        return 0;
    };
    let found = files.iter().position(|p| {
        p.to_string_lossy() == name
            || p.file_name().map(|n| n.to_string_lossy() == name).unwrap_or(false)
    });
    match found {
        Some(index) => index,
        None => {
            warn!(start_from = name, "resume file not found, starting from the beginning");
            0
        }
    }
}
