//! # Document Chunker
//!
//! Transformer models have a bounded input window; threat reports do not.
//! The chunker splits a document into windows that respect the model budget
//! while preserving the document-coordinate offset of every chunk, so that
//! predictions can be rebased and entities reconstructed exactly.
//!
//! ## Strategy
//!
//! 1. Segment the document into units: sentences where possible, words when
//!    a sentence alone exceeds the window, raw char-boundary pieces when a
//!    single word exceeds it (hard split, logged).
//! 2. Greedily pack units into windows of at most `max_chars` bytes.
//! 3. Each window after the first starts with an *overlap* region: the
//!    trailing units of the previous window, up to `overlap_chars` bytes.
//!    An entity bisected at a seam therefore appears whole in the next
//!    window, and the merger reconciles the duplicate.
//!
//! Chunk text is always an exact slice of the document. The union of the
//! non-overlap ranges `[start + overlap, end)` tiles the document exactly
//! once; overlap regions are context only.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// A bounded-size window over the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Exact slice of the document, `doc[start..end]`.
    pub text: String,
    /// Byte offset of the chunk start in document coordinates.
    pub start: usize,
    /// Byte offset of the chunk end (exclusive).
    pub end: usize,
    /// Length in bytes of the leading region shared with the previous
    /// chunk. Zero for the first chunk.
    pub overlap: usize,
    /// True when the chunk ends in the middle of a word because that word
    /// alone exceeded the window. The merger appends a visible truncation
    /// marker to entities cut at this offset.
    pub cut_midword: bool,
}

/// A segmentation unit: a candidate cut range that tiles the document.
#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    /// Unit ends mid-word (piece of an oversized word).
    cut: bool,
}

/// Splits documents into model-sized, offset-preserving windows.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    /// Creates a chunker with the given window and overlap budgets (bytes).
    ///
    /// # Panics
    /// Panics if `overlap_chars >= max_chars`: the stride between windows
    /// would be zero and chunking would never advance.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        assert!(max_chars > 0, "chunk window must be non-empty");
        assert!(
            overlap_chars < max_chars,
            "overlap ({overlap_chars}) must be smaller than the window ({max_chars})"
        );
        Self { max_chars, overlap_chars }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_chunk_chars, config.overlap_chars)
    }

    /// Splits `text` into ordered chunks covering the whole document.
    ///
    /// Empty input produces no chunks; input within the window produces a
    /// single chunk at offset 0.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.max_chars {
            return vec![Chunk {
                text: text.to_string(),
                start: 0,
                end: text.len(),
                overlap: 0,
                cut_midword: false,
            }];
        }

        let units = self.segment(text);
        self.pack(text, &units)
    }

    /// Builds the unit list: sentences, then words, then raw pieces, so
    /// that every unit fits the window and units tile the document.
    fn segment(&self, text: &str) -> Vec<Unit> {
        let mut units = Vec::new();
        for (s_start, s_end) in sentence_spans(text) {
            if s_end - s_start <= self.max_chars {
                units.push(Unit { start: s_start, end: s_end, cut: false });
                continue;
            }
            for (w_start, w_end) in word_spans(text, s_start, s_end) {
                if w_end - w_start <= self.max_chars {
                    units.push(Unit { start: w_start, end: w_end, cut: false });
                    continue;
                }
                // Single word longer than the whole window: hard split at
                // char boundaries. Never dropped silently.
                tracing::warn!(
                    offset = w_start,
                    len = w_end - w_start,
                    window = self.max_chars,
                    "word exceeds chunk window, hard-splitting"
                );
                let mut piece_start = w_start;
                while w_end - piece_start > self.max_chars {
                    let piece_end = floor_char_boundary(text, piece_start + self.max_chars);
                    units.push(Unit { start: piece_start, end: piece_end, cut: true });
                    piece_start = piece_end;
                }
                units.push(Unit { start: piece_start, end: w_end, cut: false });
            }
        }
        units
    }

    /// Greedily packs units into windows, rewinding each window start over
    /// the previous window's tail to build the overlap margin.
    fn pack(&self, text: &str, units: &[Unit]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut i = 0;
        let mut prev_first_unit = 0;

        while i < units.len() {
            let base = units[i].start;
            let mut start = base;

            if !chunks.is_empty() && self.overlap_chars > 0 {
                let mut j = i;
                while j > prev_first_unit
                    && !units[j - 1].cut
                    && base - units[j - 1].start <= self.overlap_chars
                    && units[i].end - units[j - 1].start <= self.max_chars
                {
                    j -= 1;
                }
                start = units[j].start;
            }
            let overlap = base - start;

            prev_first_unit = i;
            let mut end = units[i].end;
            let mut cut = units[i].cut;
            i += 1;
            while i < units.len() && units[i].end - start <= self.max_chars {
                end = units[i].end;
                cut = units[i].cut;
                i += 1;
            }

            chunks.push(Chunk {
                text: text[start..end].to_string(),
                start,
                end,
                overlap,
                cut_midword: cut,
            });
        }
        chunks
    }
}

/// Sentence spans tiling `text`: boundaries after `.`/`!`/`?` followed by
/// whitespace, and after newlines. The trailing whitespace of a boundary
/// stays with the following sentence, which keeps spans exact slices.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => matches!(chars.peek(), Some((_, next)) if next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            if end > start {
                spans.push((start, end));
            }
            start = end;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Word spans tiling `text[range_start..range_end]`: each span runs from
/// one word start to the next, so inter-word whitespace stays attached and
/// the spans cover the range exactly.
fn word_spans(text: &str, range_start: usize, range_end: usize) -> Vec<(usize, usize)> {
    let slice = &text[range_start..range_end];
    let mut starts = Vec::new();
    let mut in_word = false;
    for (i, c) in slice.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            starts.push(range_start + i);
        }
    }

    if starts.is_empty() {
        return vec![(range_start, range_end)];
    }

    let mut spans = Vec::new();
    // Leading whitespace belongs to the first span.
    let mut current = range_start;
    for &next_start in starts.iter().skip(1) {
        spans.push((current, next_start));
        current = next_start;
    }
    spans.push((current, range_end));
    spans
}

/// Largest char boundary `<= index` (stable replacement for the unstable
/// `str::floor_char_boundary`).
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuilding the document from non-overlap ranges must be lossless.
    fn assert_covers(text: &str, chunks: &[Chunk]) {
        let rebuilt: String = chunks
            .iter()
            .map(|c| &text[c.start + c.overlap..c.end])
            .collect();
        assert_eq!(rebuilt, text);
        if let Some(first) = chunks.first() {
            assert_eq!(first.overlap, 0);
        }
        for chunk in chunks {
            assert_eq!(chunk.text, &text[chunk.start..chunk.end]);
        }
    }

    #[test]
    fn test_empty_document() {
        let chunker = Chunker::new(100, 20);
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let chunker = Chunker::new(100, 20);
        let chunks = chunker.chunk("Emotet was observed in March.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn test_coverage_and_offsets() {
        let text = "Emotet spreads via email. The loader contacts 10.0.0.1. \
                    Analysts at Unit 42 tracked the campaign across Europe. \
                    The second stage drops a PowerShell script. Cleanup followed."
            .to_string();
        let chunker = Chunker::new(60, 15);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_chunks_respect_window() {
        let text = "one two three four five six seven eight nine ten. ".repeat(20);
        let chunker = Chunker::new(80, 20);
        for chunk in chunker.chunk(&text) {
            assert!(chunk.end - chunk.start <= 80, "chunk too large: {chunk:?}");
        }
    }

    #[test]
    fn test_no_midword_split_for_normal_text() {
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliett ".repeat(8);
        let chunker = Chunker::new(70, 10);
        let chunks = chunker.chunk(&text);
        for chunk in &chunks {
            assert!(!chunk.cut_midword);
            // Every seam lands next to whitespace, never inside a word.
            if chunk.end < text.len() {
                let before = text[..chunk.end].chars().next_back().unwrap();
                let after = text[chunk.end..].chars().next().unwrap();
                assert!(
                    before.is_whitespace() || after.is_whitespace(),
                    "seam inside a word at {}",
                    chunk.end
                );
            }
        }
    }

    #[test]
    fn test_overlap_margin_present() {
        let text = "word ".repeat(100);
        let chunker = Chunker::new(60, 20);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in chunks.iter().skip(1) {
            assert!(chunk.overlap > 0, "missing overlap: {chunk:?}");
            assert!(chunk.overlap <= 20);
        }
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_oversized_word_hard_split() {
        let long_word = "A".repeat(150);
        let text = format!("start {long_word} end");
        let chunker = Chunker::new(50, 10);
        let chunks = chunker.chunk(&text);
        assert!(chunks.iter().any(|c| c.cut_midword));
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_multibyte_hard_split_stays_on_char_boundary() {
        let long_word = "é".repeat(80); // 2 bytes per char
        let chunker = Chunker::new(33, 5);
        let chunks = chunker.chunk(&long_word);
        assert_covers(&long_word, &chunks);
        for chunk in &chunks {
            assert!(long_word.is_char_boundary(chunk.start));
            assert!(long_word.is_char_boundary(chunk.end));
        }
    }

    #[test]
    #[should_panic]
    fn test_overlap_must_be_smaller_than_window() {
        Chunker::new(10, 10);
    }
}
