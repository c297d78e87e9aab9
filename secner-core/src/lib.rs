//! # secner-core — Entity Extraction for Cybersecurity Threat Reports
//!
//! This crate implements a complete pipeline for pulling structured
//! indicators out of long-form threat intelligence prose: malware families,
//! intrusion sets, CVEs, hashes, network observables and the rest of a
//! 21-class cyber taxonomy.
//!
//! ## Architecture
//!
//! The system is a linear pipeline; data flows and is transformed stage by
//! stage:
//!
//! 1.  **Input**: raw report text (String).
//! 2.  **Chunking** ([`chunker`]): the document is split into overlapping
//!     windows sized for a transformer's context limit, never mid-word.
//! 3.  **Inference** ([`provider`]): each window goes through a back-end
//!     behind the [`NerProvider`] trait, producing per-token BIO
//!     predictions with window-local byte offsets.
//!     *   **Patterns** ([`pattern`]): regex recognizers for structured
//!         indicators (CVE ids, hashes, IPs, URLs); the zero-model default.
//!     *   **ONNX** ([`onnx`], feature `onnx`): a SecureBERT-NER style
//!         token-classification model via ONNX Runtime.
//! 4.  **Merging** ([`merger`]): offsets are rebased to document
//!     coordinates, BIO tags are assembled into entity spans, and
//!     duplicates from overlapping windows are reconciled.
//! 5.  **Output** ([`report`]): cleaned, deduplicated [`EntityReport`] with
//!     per-entity counts and per-class totals.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use secner_core::{Document, ExtractionPipeline, PatternProvider};
//!
//! let pipeline = ExtractionPipeline::new(Arc::new(PatternProvider::new()));
//!
//! let text = "Emotet operators exploited CVE-2021-44228, \
//!             staging payloads on 185.220.101.4.";
//!
//! let report = pipeline.run(&Document::new(text)).unwrap();
//! for row in &report.rows {
//!     println!("{} ({}) x{}", row.text, row.class, row.count);
//! }
//! ```
//!
//! ## Main Modules
//!
//! - [`pipeline`]: orchestrator connecting every stage, with progress events.
//! - [`chunker`]: seam-safe sliding-window segmentation.
//! - [`merger`]: BIO assembly and overlap reconciliation.
//! - [`labels`]: the entity taxonomy and BIO tag parsing.

pub mod chunker;
pub mod config;
pub mod labels;
pub mod merger;
pub mod normalize;
pub mod pattern;
pub mod pipeline;
pub mod provider;
pub mod report;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use chunker::{Chunk, Chunker};
pub use config::PipelineConfig;
pub use labels::{EntityClass, Tag};
pub use merger::{Entity, TagMerger};
pub use pattern::PatternProvider;
pub use pipeline::{Document, ExtractionPipeline, PipelineError, PipelineEvent};
pub use provider::{NerProvider, ProviderError, TokenPrediction};
pub use report::{ClassCount, EntityReport, EntityRow};

#[cfg(feature = "onnx")]
pub use onnx::{OnnxConfig, OnnxProvider};
