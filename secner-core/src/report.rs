//! # Entity Report — Deduplication and Aggregation
//!
//! Collapses the document-ordered entity list into one row per distinct
//! (class, normalized text) pair, with occurrence counts, representative
//! confidence and span, and a per-class frequency breakdown.
//!
//! Deduplication is case-insensitive: "emotet" and "Emotet" share a row,
//! and the row shows the casing that occurred most often. Ordering is
//! deterministic: descending count, ties broken by first appearance in the
//! document, so identical input always yields an identical report.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::labels::EntityClass;
use crate::merger::Entity;
use crate::normalize::{clean_surface, is_valid};

/// One deduplicated report row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    /// Canonical surface text (most frequent casing).
    pub text: String,
    pub class: EntityClass,
    /// Human-readable class description.
    pub description: String,
    /// Number of mentions across the document.
    pub count: usize,
    /// Mean confidence across mentions.
    pub confidence: f64,
    /// Byte offset of the first mention.
    pub first_seen: usize,
    /// Byte offset of the last mention.
    pub last_seen: usize,
}

/// Per-class mention counts (occurrences, not distinct rows).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCount {
    pub class: EntityClass,
    pub description: String,
    pub count: usize,
}

/// The final aggregated result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub rows: Vec<EntityRow>,
    /// Total mentions across the document. Always equals the sum of row
    /// counts and the sum of class counts.
    pub total_mentions: usize,
    pub class_counts: Vec<ClassCount>,
}

/// Accumulator for one (class, lowercased text) group.
#[derive(Debug, Default)]
struct Group {
    /// Observed casings with their frequencies and first-seen order.
    casings: HashMap<String, (usize, usize)>,
    count: usize,
    confidence_sum: f64,
    first_seen: usize,
    last_seen: usize,
}

impl EntityReport {
    /// Builds the report from merged entities. Surfaces are normalized
    /// first; entries whose cleaned text fails the validity filter are
    /// dropped (tokenizer debris, lone punctuation).
    pub fn from_entities(entities: &[Entity], min_entity_len: usize) -> Self {
        let mut groups: HashMap<(EntityClass, String), Group> = HashMap::new();
        let mut order: Vec<(EntityClass, String)> = Vec::new();

        for entity in entities {
            let text = clean_surface(&entity.text, entity.class);
            if !is_valid(&text, min_entity_len) {
                continue;
            }
            let key = (entity.class, text.to_lowercase());
            let group = match groups.get_mut(&key) {
                Some(group) => group,
                None => {
                    order.push(key.clone());
                    let group = groups.entry(key.clone()).or_default();
                    group.first_seen = entity.start;
                    group
                }
            };
            group.count += 1;
            group.confidence_sum += entity.confidence;
            group.last_seen = entity.start;
            let next_order = group.casings.len();
            let slot = group.casings.entry(text).or_insert((0, next_order));
            slot.0 += 1;
        }

        let mut rows: Vec<EntityRow> = order
            .into_iter()
            .map(|key| {
                let group = &groups[&key];
                let canonical = group
                    .casings
                    .iter()
                    .max_by(|a, b| (a.1 .0, std::cmp::Reverse(a.1 .1)).cmp(&(b.1 .0, std::cmp::Reverse(b.1 .1))))
                    .map(|(text, _)| text.clone())
                    .unwrap_or_default();
                EntityRow {
                    text: canonical,
                    class: key.0,
                    description: key.0.description().to_string(),
                    count: group.count,
                    confidence: group.confidence_sum / group.count as f64,
                    first_seen: group.first_seen,
                    last_seen: group.last_seen,
                }
            })
            .collect();

        rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));

        let total_mentions = rows.iter().map(|r| r.count).sum();

        let mut class_totals: HashMap<EntityClass, usize> = HashMap::new();
        for row in &rows {
            *class_totals.entry(row.class).or_default() += row.count;
        }
        let mut class_counts: Vec<ClassCount> = class_totals
            .into_iter()
            .map(|(class, count)| ClassCount {
                class,
                description: class.description().to_string(),
                count,
            })
            .collect();
        class_counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.class.cmp(&b.class)));

        Self { rows, total_mentions, class_counts }
    }

    /// Number of distinct classes present.
    pub fn unique_classes(&self) -> usize {
        self.class_counts.len()
    }

    /// Number of distinct (class, text) rows.
    pub fn unique_entities(&self) -> usize {
        self.rows.len()
    }

    /// Case-insensitive substring filter over text, class name, and class
    /// description. An empty query keeps every row.
    pub fn filter(&self, query: &str) -> Vec<&EntityRow> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.rows.iter().collect();
        }
        self.rows
            .iter()
            .filter(|row| {
                row.text.to_lowercase().contains(&query)
                    || row.class.name().to_lowercase().contains(&query)
                    || row.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Flat tabular export: `entity,class,description,count`.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["entity", "class", "description", "count"])?;
        for row in &self.rows {
            writer.write_record([
                row.text.as_str(),
                row.class.name(),
                row.description.as_str(),
                &row.count.to_string(),
            ])?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(text: &str, class: EntityClass, start: usize, confidence: f64) -> Entity {
        Entity {
            text: text.to_string(),
            class,
            start,
            end: start + text.len(),
            confidence,
            from_overlap: false,
        }
    }

    #[test]
    fn test_dedup_counts_repeats() {
        let entities = vec![
            entity("Emotet", EntityClass::Mal, 0, 0.9),
            entity("Emotet", EntityClass::Mal, 50, 0.8),
            entity("Emotet", EntityClass::Mal, 120, 0.7),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].count, 3);
        assert_eq!(report.rows[0].first_seen, 0);
        assert_eq!(report.rows[0].last_seen, 120);
        assert!((report.rows[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_same_text_different_classes_separate_rows() {
        let entities = vec![
            entity("Lazarus", EntityClass::Apt, 0, 0.9),
            entity("Lazarus", EntityClass::Mal, 40, 0.9),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        assert_eq!(report.rows.len(), 2);
    }

    #[test]
    fn test_case_insensitive_dedup_keeps_majority_casing() {
        let entities = vec![
            entity("emotet", EntityClass::Mal, 0, 0.9),
            entity("Emotet", EntityClass::Mal, 10, 0.9),
            entity("Emotet", EntityClass::Mal, 20, 0.9),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].text, "Emotet");
        assert_eq!(report.rows[0].count, 3);
    }

    #[test]
    fn test_conservation_of_counts() {
        let entities = vec![
            entity("Emotet", EntityClass::Mal, 0, 0.9),
            entity("Dridex", EntityClass::Mal, 10, 0.9),
            entity("Emotet", EntityClass::Mal, 20, 0.9),
            entity("APT28", EntityClass::Apt, 30, 0.9),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        let row_sum: usize = report.rows.iter().map(|r| r.count).sum();
        let class_sum: usize = report.class_counts.iter().map(|c| c.count).sum();
        assert_eq!(report.total_mentions, 4);
        assert_eq!(row_sum, report.total_mentions);
        assert_eq!(class_sum, report.total_mentions);
    }

    #[test]
    fn test_ordering_by_count_then_first_seen() {
        let entities = vec![
            entity("Dridex", EntityClass::Mal, 0, 0.9),
            entity("Emotet", EntityClass::Mal, 10, 0.9),
            entity("Emotet", EntityClass::Mal, 20, 0.9),
            entity("APT28", EntityClass::Apt, 30, 0.9),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        assert_eq!(report.rows[0].text, "Emotet");
        // Tie between Dridex (first_seen 0) and APT28 (first_seen 30).
        assert_eq!(report.rows[1].text, "Dridex");
        assert_eq!(report.rows[2].text, "APT28");
    }

    #[test]
    fn test_invalid_surfaces_dropped() {
        let entities = vec![
            entity("--", EntityClass::Mal, 0, 0.9),
            entity("E", EntityClass::Mal, 10, 0.9),
            entity("Emotet", EntityClass::Mal, 20, 0.9),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.total_mentions, 1);
    }

    #[test]
    fn test_empty_input() {
        let report = EntityReport::from_entities(&[], 2);
        assert!(report.rows.is_empty());
        assert_eq!(report.total_mentions, 0);
        assert_eq!(report.unique_classes(), 0);
    }

    #[test]
    fn test_filter() {
        let entities = vec![
            entity("Emotet", EntityClass::Mal, 0, 0.9),
            entity("10.0.0.1", EntityClass::Ip, 10, 0.9),
        ];
        let report = EntityReport::from_entities(&entities, 2);
        assert_eq!(report.filter("emo").len(), 1);
        assert_eq!(report.filter("malware").len(), 1);
        assert_eq!(report.filter("").len(), 2);
        assert_eq!(report.filter("zzz").len(), 0);
    }

    #[test]
    fn test_csv_shape() {
        let entities = vec![entity("Emotet", EntityClass::Mal, 0, 0.9)];
        let report = EntityReport::from_entities(&entities, 2);
        let csv = report.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("entity,class,description,count"));
        assert_eq!(lines.next(), Some("Emotet,MAL,Malware,1"));
    }
}
