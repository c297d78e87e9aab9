//! # Tag Merger — From Token Predictions to Whole Entities
//!
//! Implements the BIO finite-state machine that turns per-token (often
//! sub-word) predictions into structured entity spans:
//!
//! - `B-X` opens an entity of class X.
//! - `I-X` of the same class extends the open entity's end offset.
//! - Anything else (`O`, a different class, a new `B`) closes it.
//! - An orphan `I-X` with no open entity is recovered as a new entity start
//!   rather than dropped; the malformation is logged at debug level.
//!
//! Surface text is reconstructed by slicing the original document with the
//! merged offsets, so sub-word fragments concatenate exactly as they
//! appeared in the report, with no separators invented.
//!
//! The merger also owns the two chunk-seam concerns:
//! - **Overlap reconciliation**: an entity materialized inside a chunk's
//!   leading overlap was already visible to the previous chunk. Duplicates
//!   are matched by span intersection and class; the more complete span
//!   wins (longer, then higher confidence, then the earlier chunk).
//! - **Truncation markers**: an entity cut where an oversized word was
//!   hard-split gets a visible `…` appended, never a silent cut.

use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::config::PipelineConfig;
use crate::labels::{EntityClass, Tag};
use crate::provider::TokenPrediction;

/// Visible marker appended to surface text cut by an oversized-word split.
pub const TRUNCATION_MARKER: char = '\u{2026}';

/// A whole entity span in document coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Surface text exactly as it appears in the document (plus a
    /// truncation marker when the span was cut mid-word by the chunker).
    pub text: String,
    pub class: EntityClass,
    /// Byte offset of the first char, document coordinates.
    pub start: usize,
    /// Byte offset past the last char.
    pub end: usize,
    /// Minimum of the constituent token scores: a multi-token entity is
    /// only as reliable as its weakest token.
    pub confidence: f64,
    /// Entity begins inside the chunk's leading overlap region, so it may
    /// duplicate an entity from the previous chunk.
    pub from_overlap: bool,
}

/// Converts document-ordered predictions into entities via the BIO state
/// machine. Predictions must already be rebased to document coordinates.
pub fn bio_to_entities(doc: &str, predictions: &[TokenPrediction]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut open: Option<Entity> = None;

    for pred in predictions {
        let tag = match Tag::parse(&pred.tag) {
            Some(tag) => tag,
            None => {
                tracing::debug!(tag = %pred.tag, start = pred.start, "unknown tag, treating as outside");
                Tag::Outside
            }
        };

        match tag {
            Tag::Begin(class) => {
                if let Some(done) = open.take() {
                    entities.push(done);
                }
                open = Some(new_entity(doc, class, pred));
            }
            Tag::Inside(class) => match open.as_mut() {
                Some(current) if current.class == class => {
                    current.end = pred.end;
                    current.text = doc[current.start..current.end].to_string();
                    current.confidence = current.confidence.min(pred.score);
                }
                _ => {
                    // Malformed sequence: I without a matching B. Recover
                    // by starting a new entity instead of dropping data.
                    tracing::debug!(tag = %pred.tag, start = pred.start, "orphan inside-tag, starting new entity");
                    if let Some(done) = open.take() {
                        entities.push(done);
                    }
                    open = Some(new_entity(doc, class, pred));
                }
            },
            Tag::Outside => {
                if let Some(done) = open.take() {
                    entities.push(done);
                }
            }
        }
    }

    if let Some(done) = open {
        entities.push(done);
    }
    entities
}

fn new_entity(doc: &str, class: EntityClass, pred: &TokenPrediction) -> Entity {
    Entity {
        text: doc[pred.start..pred.end].to_string(),
        class,
        start: pred.start,
        end: pred.end,
        confidence: pred.score,
        from_overlap: false,
    }
}

/// Assembles per-chunk predictions into the final document-ordered entity
/// list: BIO merge per chunk, seam reconciliation, adjacent-span
/// coalescing, truncation markers.
#[derive(Debug, Clone)]
pub struct TagMerger {
    merge_gap: usize,
}

impl TagMerger {
    pub fn new(merge_gap: usize) -> Self {
        Self { merge_gap }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.merge_gap)
    }

    /// `per_chunk[i]` holds the rebased predictions of `chunks[i]`; the two
    /// slices run in document (chunk) order regardless of which back-end
    /// thread finished first.
    pub fn merge(
        &self,
        doc: &str,
        chunks: &[Chunk],
        per_chunk: &[Vec<TokenPrediction>],
    ) -> Vec<Entity> {
        debug_assert_eq!(chunks.len(), per_chunk.len());

        let mut kept: Vec<Entity> = Vec::new();
        for (chunk, predictions) in chunks.iter().zip(per_chunk) {
            let overlap_end = chunk.start + chunk.overlap;
            for mut entity in bio_to_entities(doc, predictions) {
                entity.from_overlap = chunk.overlap > 0 && entity.start < overlap_end;
                if entity.from_overlap {
                    reconcile(&mut kept, entity);
                } else {
                    kept.push(entity);
                }
            }
        }

        kept.sort_by_key(|e| (e.start, e.end));
        let mut merged = coalesce_adjacent(doc, kept, self.merge_gap);

        // Visible marker where the chunker had to cut inside a word.
        let cuts: Vec<usize> = chunks
            .iter()
            .filter(|c| c.cut_midword)
            .map(|c| c.end)
            .collect();
        if !cuts.is_empty() {
            for entity in &mut merged {
                if cuts.contains(&entity.end) {
                    entity.text.push(TRUNCATION_MARKER);
                }
            }
        }
        merged
    }
}

/// Admits an overlap-region entity, discarding whichever copy of a
/// duplicate is less complete.
fn reconcile(kept: &mut Vec<Entity>, candidate: Entity) {
    for existing in kept.iter_mut() {
        let intersects = candidate.start < existing.end && existing.start < candidate.end;
        if intersects && existing.class == candidate.class {
            let candidate_len = candidate.end - candidate.start;
            let existing_len = existing.end - existing.start;
            let candidate_wins = candidate_len > existing_len
                || (candidate_len == existing_len && candidate.confidence > existing.confidence);
            if candidate_wins {
                *existing = candidate;
            }
            return;
        }
    }
    kept.push(candidate);
}

/// Coalesces consecutive same-class entities whose gap is at most
/// `merge_gap` bytes. Sub-word tokenizers routinely split one indicator
/// into fragments a character or two apart; this stitches them back.
fn coalesce_adjacent(doc: &str, entities: Vec<Entity>, merge_gap: usize) -> Vec<Entity> {
    let mut result: Vec<Entity> = Vec::new();
    for entity in entities {
        match result.last_mut() {
            Some(prev)
                if prev.class == entity.class
                    && entity.start >= prev.start
                    && entity.start.saturating_sub(prev.end) <= merge_gap =>
            {
                if entity.end > prev.end {
                    prev.end = entity.end;
                    prev.text = doc[prev.start..prev.end].to_string();
                }
                prev.confidence = prev.confidence.min(entity.confidence);
                prev.from_overlap |= entity.from_overlap;
            }
            _ => result.push(entity),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(start: usize, end: usize, tag: &str, score: f64) -> TokenPrediction {
        TokenPrediction { start, end, tag: tag.into(), score }
    }

    fn chunk_of(doc: &str, start: usize, end: usize, overlap: usize) -> Chunk {
        Chunk {
            text: doc[start..end].to_string(),
            start,
            end,
            overlap,
            cut_midword: false,
        }
    }

    #[test]
    fn test_begin_inside_merges_to_one_entity() {
        let doc = "The Emotet Loader appeared.";
        let preds = vec![
            pred(4, 10, "B-MAL", 0.95),
            pred(11, 17, "I-MAL", 0.90),
        ];
        let entities = bio_to_entities(doc, &preds);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].text, "Emotet Loader");
        assert_eq!(entities[0].class, EntityClass::Mal);
        // Minimum of constituent scores.
        assert!((entities[0].confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_subword_fragments_concatenate_without_separator() {
        let doc = "GandCrab detected";
        let preds = vec![
            pred(0, 4, "B-MAL", 0.9),
            pred(4, 8, "I-MAL", 0.8),
        ];
        let entities = bio_to_entities(doc, &preds);
        assert_eq!(entities[0].text, "GandCrab");
    }

    #[test]
    fn test_class_change_closes_entity() {
        let doc = "Emotet APT28 report";
        let preds = vec![
            pred(0, 6, "B-MAL", 0.9),
            pred(7, 12, "B-APT", 0.9),
        ];
        let entities = bio_to_entities(doc, &preds);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].class, EntityClass::Mal);
        assert_eq!(entities[1].class, EntityClass::Apt);
    }

    #[test]
    fn test_orphan_inside_recovered_as_new_entity() {
        let doc = "then Mimikatz ran";
        let preds = vec![pred(5, 13, "I-TOOL", 0.7)];
        let entities = bio_to_entities(doc, &preds);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].text, "Mimikatz");
        assert_eq!(entities[0].class, EntityClass::Tool);
    }

    #[test]
    fn test_unknown_tag_treated_as_outside() {
        let doc = "Emotet spreads";
        let preds = vec![
            pred(0, 6, "B-MAL", 0.9),
            pred(7, 14, "B-GIBBERISH", 0.9),
        ];
        let entities = bio_to_entities(doc, &preds);
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn test_empty_predictions_no_entities() {
        assert!(bio_to_entities("some text", &[]).is_empty());
    }

    #[test]
    fn test_adjacent_coalescing_within_gap() {
        let doc = "Power Sploit used here";
        let chunks = vec![chunk_of(doc, 0, doc.len(), 0)];
        let per_chunk = vec![vec![
            pred(0, 5, "B-TOOL", 0.9),
            pred(6, 12, "B-TOOL", 0.8),
        ]];
        let merged = TagMerger::new(3).merge(doc, &chunks, &per_chunk);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Power Sploit");
        assert!((merged[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_distant_same_class_not_coalesced() {
        let doc = "Emotet was seen, later Dridex too";
        let chunks = vec![chunk_of(doc, 0, doc.len(), 0)];
        let per_chunk = vec![vec![
            pred(0, 6, "B-MAL", 0.9),
            pred(23, 29, "B-MAL", 0.9),
        ]];
        let merged = TagMerger::new(3).merge(doc, &chunks, &per_chunk);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_seam_duplicate_reported_once_with_full_span() {
        // "Emotet Loader" straddles the seam at byte 31; the second chunk's
        // overlap re-covers it completely.
        let doc = "campaign details follow: Emotet Loader infected hosts";
        let chunks = vec![
            chunk_of(doc, 0, 31, 0),   // "... Emotet" (entity cut at seam)
            chunk_of(doc, 25, doc.len(), 6), // overlap re-covers "Emotet Loader"
        ];
        let per_chunk = vec![
            vec![pred(25, 31, "B-MAL", 0.99)],
            vec![pred(25, 31, "B-MAL", 0.95), pred(32, 38, "I-MAL", 0.94)],
        ];
        let merged = TagMerger::new(3).merge(doc, &chunks, &per_chunk);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Emotet Loader");
        assert_eq!(merged[0].start, 25);
        assert_eq!(merged[0].end, 38);
    }

    #[test]
    fn test_overlap_duplicate_identical_span_kept_once() {
        let doc = "seen at 10.0.0.1 today and more text here";
        let chunks = vec![
            chunk_of(doc, 0, 22, 0),
            chunk_of(doc, 8, doc.len(), 14),
        ];
        let per_chunk = vec![
            vec![pred(8, 16, "B-IP", 0.95)],
            vec![pred(8, 16, "B-IP", 0.97)],
        ];
        let merged = TagMerger::new(3).merge(doc, &chunks, &per_chunk);
        assert_eq!(merged.len(), 1);
        // Equal spans: the higher-confidence copy wins.
        assert!((merged[0].confidence - 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_truncation_marker_appended() {
        let doc = "AAAAAAAAAA BBBB";
        let mut first = chunk_of(doc, 0, 10, 0);
        first.cut_midword = true;
        let chunks = vec![first, chunk_of(doc, 10, doc.len(), 0)];
        let per_chunk = vec![vec![pred(0, 10, "B-MAL", 0.9)], vec![]];
        let merged = TagMerger::new(0).merge(doc, &chunks, &per_chunk);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].text.ends_with(TRUNCATION_MARKER));
    }
}
