//! # Extraction Pipeline — Orchestrator with Observable Events
//!
//! Connects every stage end to end: chunking, inference through the
//! provider abstraction, offset rebasing, tag merging, and report
//! aggregation. Progress is observable through an `mpsc` channel so the
//! web layer can drive a progress indicator without knowing anything about
//! chunking internals.
//!
//! Reports are all-or-nothing per document: an inference failure on any
//! chunk fails the whole request and no partial report is published.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunker::{Chunk, Chunker};
use crate::config::PipelineConfig;
use crate::merger::TagMerger;
use crate::provider::{NerProvider, ProviderError, TokenPrediction};
use crate::report::EntityReport;

/// An ingested document: raw text plus a stable identifier.
///
/// Immutable once created; owned by the pipeline run and discarded after
/// the report is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self { id: format!("doc-{:016x}", hasher.finish()), text }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Failure of one pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The inference back-end failed on a chunk. Carries the provider's
    /// transient/fatal distinction for the caller; the pipeline itself
    /// never retries.
    #[error("inference failed on chunk {chunk}: {source}")]
    Inference {
        chunk: usize,
        #[source]
        source: ProviderError,
    },
    /// CSV export failed.
    #[error("report export failed: {0}")]
    Export(#[from] csv::Error),
}

impl PipelineError {
    /// Whether an identical retry could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Inference { source, .. } if source.is_retryable())
    }
}

/// Events emitted while a document is processed.
///
/// The web layer forwards these over a WebSocket so the client can render
/// chunk-by-chunk progress, mirroring the synchronous result of
/// [`ExtractionPipeline::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// The document was split into windows.
    ChunkingDone { total_chunks: usize, document_chars: usize },
    /// One chunk went through inference.
    ChunkProcessed { current: usize, total: usize, predictions: usize },
    /// The run finished; the full report is attached.
    Done {
        report: EntityReport,
        total_mentions: usize,
        processing_ms: u64,
    },
    /// The run failed; no partial report exists.
    Error { message: String, retryable: bool },
}

/// The document-to-report pipeline.
///
/// Holds the inference back-end behind the narrow [`NerProvider`]
/// capability, so any implementation (regex patterns, ONNX on CPU or
/// accelerator) slots in without the pipeline noticing. The provider is
/// shared and effectively immutable, safe across concurrent requests.
pub struct ExtractionPipeline {
    provider: Arc<dyn NerProvider>,
    config: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn new(provider: Arc<dyn NerProvider>) -> Self {
        Self::with_config(provider, PipelineConfig::default())
    }

    pub fn with_config(provider: Arc<dyn NerProvider>, config: PipelineConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes a document synchronously and returns the final report.
    pub fn run(&self, doc: &Document) -> Result<EntityReport, PipelineError> {
        self.execute(doc, None)
    }

    /// Processes a document, pushing progress events through `tx`.
    ///
    /// Ends with either [`PipelineEvent::Done`] or [`PipelineEvent::Error`];
    /// nothing is returned directly.
    pub fn run_streaming(&self, doc: &Document, tx: mpsc::Sender<PipelineEvent>) {
        if let Err(err) = self.execute(doc, Some(&tx)) {
            let _ = tx.send(PipelineEvent::Error {
                message: err.to_string(),
                retryable: err.is_retryable(),
            });
        }
    }

    fn execute(
        &self,
        doc: &Document,
        events: Option<&mpsc::Sender<PipelineEvent>>,
    ) -> Result<EntityReport, PipelineError> {
        let started = std::time::Instant::now();

        let chunks = Chunker::from_config(&self.config).chunk(&doc.text);
        if let Some(tx) = events {
            let _ = tx.send(PipelineEvent::ChunkingDone {
                total_chunks: chunks.len(),
                document_chars: doc.text.chars().count(),
            });
        }

        let per_chunk = self.infer(&chunks, events)?;

        let entities = TagMerger::from_config(&self.config).merge(&doc.text, &chunks, &per_chunk);
        let report = EntityReport::from_entities(&entities, self.config.min_entity_len);

        tracing::info!(
            doc = %doc.id,
            chunks = chunks.len(),
            rows = report.rows.len(),
            mentions = report.total_mentions,
            "extraction finished"
        );

        if let Some(tx) = events {
            let _ = tx.send(PipelineEvent::Done {
                report: report.clone(),
                total_mentions: report.total_mentions,
                processing_ms: started.elapsed().as_millis() as u64,
            });
        }
        Ok(report)
    }

    /// Runs inference per chunk and rebases offsets to document
    /// coordinates. In parallel mode chunks run on the rayon pool, but
    /// results are reassembled in chunk order, so merging never observes
    /// completion order.
    fn infer(
        &self,
        chunks: &[Chunk],
        events: Option<&mpsc::Sender<PipelineEvent>>,
    ) -> Result<Vec<Vec<TokenPrediction>>, PipelineError> {
        let total = chunks.len();

        let results: Vec<Result<Vec<TokenPrediction>, ProviderError>> = if self.config.parallel {
            chunks.par_iter().map(|chunk| self.extract_rebased(chunk)).collect()
        } else {
            chunks.iter().map(|chunk| self.extract_rebased(chunk)).collect()
        };

        let mut per_chunk = Vec::with_capacity(total);
        for (index, result) in results.into_iter().enumerate() {
            let predictions =
                result.map_err(|source| PipelineError::Inference { chunk: index, source })?;
            if let Some(tx) = events {
                let _ = tx.send(PipelineEvent::ChunkProcessed {
                    current: index + 1,
                    total,
                    predictions: predictions.len(),
                });
            }
            per_chunk.push(predictions);
        }
        Ok(per_chunk)
    }

    fn extract_rebased(&self, chunk: &Chunk) -> Result<Vec<TokenPrediction>, ProviderError> {
        let predictions = self.provider.extract(&chunk.text)?;
        Ok(predictions.into_iter().map(|p| p.rebase(chunk.start)).collect())
    }
}
