//! # Surface-Text Normalizer
//!
//! Raw model output is noisy: sub-word tokenizers leave BPE prefix markers
//! and phantom spaces, some exports leak the BIO label into the text, and
//! aggregation occasionally doubles an entity ("GandCrab GandCrab"). The
//! normalizer repairs the surface text before deduplication so that the
//! same real-world entity always lands in the same report row.
//!
//! Repair is class-aware: identifiers (hashes, CVE IDs, IPs, URLs) can
//! never contain spaces, so every internal space there is tokenizer debris;
//! malware/tool/APT names are usually CamelCase compounds, so a two-part
//! split like "Power Sploit" is rejoined.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::labels::EntityClass;

static BPE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\u{0120}\u{2581}#]+").expect("static pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static pattern"));
static IOB_LEAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[BI]-(?:SecTeam|Sec|HackOrg|Org|Mal|Tool|Act|Apt|Time|Loc|Idty|Encr|File|Prot|VulName|VulId|Os|Sha2|Sha1|Md5|Url|Ip|Dom|Email)\s*",
    )
    .expect("static pattern")
});
static TRAILING_DASHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{2013}\u{2014}]+$").expect("static pattern"));
static POSSESSIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*'s?$").expect("static pattern"));
static EXP_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*-?\s*Exp$").expect("static pattern"));

/// Punctuation stripped from the outer edges of a surface.
const EDGE_JUNK: &[char] = &[
    '"', '\'', '`', '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '|', '\\', '/',
    '@', '#', '$', '%', '^', '&', '*', '+', '=', '~', '<', '>', '-', ' ',
];

/// Cleans a raw entity surface for the given class.
pub fn clean_surface(raw: &str, class: EntityClass) -> String {
    // 1. BPE prefix markers and whitespace normalization.
    let word = BPE_PREFIX.replace(raw, "");
    let mut word = WHITESPACE.replace_all(word.trim(), " ").into_owned();

    // 2. BIO labels that leaked into the surface text.
    word = IOB_LEAK.replace_all(&word, " ").trim().to_string();

    // 3. Class-aware space repair.
    if class.is_structured() {
        word = word.split_whitespace().collect();
    } else {
        word = rejoin_fragments(&word, class);
    }

    // 4. Doubled entity text ("GandCrab GandCrab" -> "GandCrab").
    word = WHITESPACE.replace_all(word.trim(), " ").into_owned();
    word = strip_doubled_half(&word);

    // 5. Isolated single-letter fragments between real words.
    word = drop_isolated_capitals(&word);

    // 6. Outer punctuation junk and stray dashes.
    word = word.trim_matches(EDGE_JUNK).to_string();
    word = TRAILING_DASHES.replace(&word, "").trim().to_string();

    // 7. Possessive and dataset-label artifacts.
    word = POSSESSIVE.replace(&word, "").trim().to_string();
    word = EXP_SUFFIX.replace(&word, "").trim().to_string();

    WHITESPACE.replace_all(word.trim(), " ").into_owned()
}

/// Cleaned surfaces shorter than `min_len` chars, or with no alphanumeric
/// content at all, are tokenizer debris and are dropped.
pub fn is_valid(word: &str, min_len: usize) -> bool {
    word.chars().count() >= min_len && word.chars().any(|c| c.is_ascii_alphanumeric())
}

/// Rejoins words the sub-word tokenizer fragmented with spaces.
fn rejoin_fragments(word: &str, class: EntityClass) -> String {
    let parts: Vec<&str> = word.split_whitespace().collect();
    match parts.as_slice() {
        // "PR OM ET HI UM" -> "PROMETHIUM"
        [_, rest @ ..] if rest.len() >= 2 && rest.iter().all(|p| p.chars().count() <= 3) => {
            parts.concat()
        }
        [first, second] => {
            let second_starts_lower = second.chars().next().is_some_and(|c| c.is_lowercase());
            if second_starts_lower {
                // "Turkmen istan" -> "Turkmenistan"
                format!("{first}{second}")
            } else if second.chars().count() <= 2 {
                // "C 2" -> "C2"
                format!("{first}{second}")
            } else if is_all_caps(first) && is_all_caps(second) {
                format!("{first}{second}")
            } else if class.is_compound_name() {
                // "Power Sploit" -> "PowerSploit"
                format!("{first}{second}")
            } else {
                word.to_string()
            }
        }
        _ => word.to_string(),
    }
}

fn is_all_caps(s: &str) -> bool {
    s.chars().any(|c| c.is_uppercase()) && !s.chars().any(|c| c.is_lowercase())
}

/// "GandCrab GandCrab" -> "GandCrab", "APT 10 APT 10" -> "APT 10".
fn strip_doubled_half(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() >= 4 && chars.len() % 2 == 0 {
        let mid = chars.len() / 2;
        let first: String = chars[..mid].iter().collect();
        let second: String = chars[mid..].iter().collect();
        if first.trim() == second.trim() {
            return first.trim().to_string();
        }
    }

    let parts: Vec<&str> = word.split_whitespace().collect();
    if parts.len() >= 2 && parts.len() % 2 == 0 {
        let half = parts.len() / 2;
        if parts[..half] == parts[half..] {
            return parts[..half].join(" ");
        }
    }
    word.to_string()
}

/// Removes interior single-capital fragments ("Cobalt S Strike" noise),
/// keeping first and last words intact so "C2" and lone initials survive.
fn drop_isolated_capitals(word: &str) -> String {
    let parts: Vec<&str> = word.split_whitespace().collect();
    if parts.len() <= 2 {
        return word.to_string();
    }
    let last = parts.len() - 1;
    let kept: Vec<&str> = parts
        .iter()
        .enumerate()
        .filter(|(i, p)| {
            *i == 0 || *i == last || !(p.chars().count() == 1 && p.chars().all(|c| c.is_ascii_uppercase()))
        })
        .map(|(_, p)| *p)
        .collect();
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpe_markers_stripped() {
        assert_eq!(clean_surface("\u{0120}Emotet", EntityClass::Mal), "Emotet");
        assert_eq!(clean_surface("##mikatz", EntityClass::Tool), "mikatz");
    }

    #[test]
    fn test_structured_class_collapses_spaces() {
        assert_eq!(
            clean_surface("CVE - 2021 - 44228", EntityClass::VulId),
            "CVE-2021-44228"
        );
        assert_eq!(
            clean_surface("192 . 168 . 1 . 1", EntityClass::Ip),
            "192.168.1.1"
        );
    }

    #[test]
    fn test_compound_name_rejoined() {
        assert_eq!(clean_surface("Power Sploit", EntityClass::Tool), "PowerSploit");
        assert_eq!(clean_surface("Hyper Bro", EntityClass::Mal), "HyperBro");
        // Non-compound classes keep the space.
        assert_eq!(clean_surface("Lazarus Group", EntityClass::SecTeam), "Lazarus Group");
    }

    #[test]
    fn test_midword_split_rejoined() {
        assert_eq!(clean_surface("Turkmen istan", EntityClass::Loc), "Turkmenistan");
        assert_eq!(clean_surface("C 2", EntityClass::Tool), "C2");
    }

    #[test]
    fn test_many_short_fragments_concatenated() {
        assert_eq!(clean_surface("PR OM ET HI UM", EntityClass::Apt), "PROMETHIUM");
    }

    #[test]
    fn test_doubled_text_deduplicated() {
        assert_eq!(clean_surface("GandCrab GandCrab", EntityClass::Mal), "GandCrab");
        assert_eq!(clean_surface("APT 10 APT 10", EntityClass::Apt), "APT10");
        assert_eq!(clean_surface("APT 10", EntityClass::Apt), "APT10");
    }

    #[test]
    fn test_leaked_iob_label_removed() {
        assert_eq!(clean_surface("Emotet B-Mal", EntityClass::Mal), "Emotet");
    }

    #[test]
    fn test_outer_punctuation_stripped() {
        assert_eq!(clean_surface("\"Emotet\",", EntityClass::Mal), "Emotet");
        assert_eq!(clean_surface("(Mimikatz)", EntityClass::Tool), "Mimikatz");
    }

    #[test]
    fn test_possessive_stripped() {
        assert_eq!(clean_surface("Emotet's", EntityClass::Mal), "Emotet");
    }

    #[test]
    fn test_validity() {
        assert!(is_valid("Emotet", 2));
        assert!(!is_valid("E", 2));
        assert!(!is_valid("--", 2));
        assert!(is_valid("C2", 2));
    }
}
