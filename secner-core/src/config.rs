//! # Pipeline Configuration
//!
//! Single source of truth for the tunable constants of the extraction
//! pipeline. The algorithms consume this configuration, they do not own it:
//! callers (the web server, tests) construct it and may override any field.

use serde::{Deserialize, Serialize};

/// Conservative character budget per chunk so that a 512-token model window
/// is never exceeded (assumes ~3-4 chars per model token on average).
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1800;

/// Leading overlap carried into each subsequent chunk so that entities
/// bisected at a seam appear whole in at least one chunk.
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

/// Maximum character gap between consecutive same-class spans that the
/// merger coalesces into one entity (recovers sub-word fragmentation).
pub const DEFAULT_MERGE_GAP: usize = 3;

/// Cleaned surface text shorter than this is dropped as tokenizer debris.
pub const DEFAULT_MIN_ENTITY_LEN: usize = 2;

/// Tunable parameters of the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum chunk size in characters (model window budget).
    pub max_chunk_chars: usize,
    /// Overlap margin in characters between adjacent chunks.
    pub overlap_chars: usize,
    /// Maximum gap for adjacent same-class span coalescing.
    pub merge_gap: usize,
    /// Minimum length of a cleaned entity surface.
    pub min_entity_len: usize,
    /// Process chunks on the rayon thread pool instead of sequentially.
    /// Purely a throughput knob: results are reassembled in document order,
    /// so the report is identical either way.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
            merge_gap: DEFAULT_MERGE_GAP,
            min_entity_len: DEFAULT_MIN_ENTITY_LEN,
            parallel: false,
        }
    }
}
