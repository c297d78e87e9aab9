//! # Pattern Provider — Regex Rules for Structured Indicators
//!
//! A rule back-end complements the statistical model with explicit
//! knowledge: well-formed indicators of compromise (CVE IDs, hashes, IP
//! addresses, URLs) follow rigid formats that regular expressions match
//! with near-perfect precision.
//!
//! This provider implements the same [`NerProvider`] contract as the model
//! back-ends, which makes it three things at once: a CPU-only fallback when
//! no model weights are installed, the default back-end of the web server,
//! and a deterministic workhorse for pipeline tests.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::labels::{EntityClass, Tag};
use crate::provider::{NerProvider, ProviderError, TokenPrediction};

/// One indicator rule: class, compiled pattern, fixed confidence.
struct Rule {
    class: EntityClass,
    pattern: Regex,
    confidence: f64,
}

/// Rules in priority order. Earlier rules claim their byte ranges first,
/// so a URL is never re-reported as the domain inside it, and a SHA-256
/// is never re-reported as shorter hash prefixes.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let rule = |class, pattern: &str, confidence| Rule {
        class,
        pattern: Regex::new(pattern).expect("static rule pattern must compile"),
        confidence,
    };
    vec![
        rule(EntityClass::Url, r"https?://[^\s\x22'<>)\]]+", 0.97),
        rule(
            EntityClass::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            0.97,
        ),
        rule(EntityClass::VulId, r"(?i)\bCVE-\d{4}-\d{4,7}\b", 0.99),
        rule(
            EntityClass::VulName,
            r"\b(?:Log4Shell|EternalBlue|Heartbleed|Shellshock|BlueKeep|ProxyLogon|ProxyShell|PrintNightmare|ZeroLogon|Spectre|Meltdown|Follina)\b",
            0.92,
        ),
        rule(EntityClass::Sha2, r"\b[0-9a-fA-F]{64}\b", 0.99),
        rule(EntityClass::Sha1, r"\b[0-9a-fA-F]{40}\b", 0.98),
        rule(EntityClass::Md5, r"\b[0-9a-fA-F]{32}\b", 0.98),
        rule(
            EntityClass::Ip,
            r"\b(?:\d{1,3}(?:\.|\[\.\])){3}\d{1,3}\b",
            0.95,
        ),
        rule(
            EntityClass::File,
            r"\b[\w.-]+\.(?:exe|dll|ps1|bat|cmd|vbs|js|jar|docm?|docx|xlsm?|xlsx|pdf|zip|rar|7z|iso|lnk|scr|sys|bin|elf|sh)\b",
            0.90,
        ),
        rule(
            EntityClass::Dom,
            r"\b(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.|\[\.\]))+(?:com|net|org|io|info|biz|ru|cn|su|top|xyz|onion|site|online)\b",
            0.88,
        ),
    ]
});

/// Regex/IOC back-end for structured cybersecurity indicators.
///
/// Deterministic, dependency-free at runtime, and always available: this
/// provider has no weights to load, so it never fails.
#[derive(Debug, Default)]
pub struct PatternProvider;

impl PatternProvider {
    pub fn new() -> Self {
        Self
    }
}

impl NerProvider for PatternProvider {
    fn extract(&self, text: &str) -> Result<Vec<TokenPrediction>, ProviderError> {
        // Byte ranges already claimed by a higher-priority rule.
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut predictions = Vec::new();

        for rule in RULES.iter() {
            for m in rule.pattern.find_iter(text) {
                let overlaps = claimed
                    .iter()
                    .any(|&(s, e)| m.start() < e && s < m.end());
                if overlaps {
                    continue;
                }
                claimed.push((m.start(), m.end()));
                predictions.push(TokenPrediction {
                    start: m.start(),
                    end: m.end(),
                    tag: Tag::Begin(rule.class).label(),
                    score: rule.confidence,
                });
            }
        }

        predictions.sort_by_key(|p| p.start);
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<TokenPrediction> {
        PatternProvider::new().extract(text).unwrap()
    }

    fn tags(text: &str) -> Vec<(String, String)> {
        extract(text)
            .into_iter()
            .map(|p| (p.tag, text[p.start..p.end].to_string()))
            .collect()
    }

    #[test]
    fn test_cve_id() {
        let found = tags("Exploits CVE-2021-44228 in the wild.");
        assert_eq!(found, vec![("B-VULID".into(), "CVE-2021-44228".into())]);
    }

    #[test]
    fn test_named_vulnerability() {
        let found = tags("Log4Shell (CVE-2021-44228) was weaponized fast.");
        assert!(found.contains(&("B-VULNAME".into(), "Log4Shell".into())));
        assert!(found.contains(&("B-VULID".into(), "CVE-2021-44228".into())));
    }

    #[test]
    fn test_ip_and_defanged_ip() {
        let found = tags("C2 at 185.220.101.4 and 10[.]0[.]0[.]1 today");
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|(t, _)| t == "B-IP"));
    }

    #[test]
    fn test_hash_lengths_do_not_shadow() {
        let sha2 = "a".repeat(64);
        let md5 = "b".repeat(32);
        let found = tags(&format!("hashes {sha2} and {md5}"));
        assert_eq!(found[0].0, "B-SHA2");
        assert_eq!(found[1].0, "B-MD5");
    }

    #[test]
    fn test_url_claims_over_domain() {
        let found = tags("payload at http://evil.example.com/a.php served");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "B-URL");
    }

    #[test]
    fn test_file_name() {
        let found = tags("drops invoice_2023.exe on disk");
        assert_eq!(found, vec![("B-FILE".into(), "invoice_2023.exe".into())]);
    }

    #[test]
    fn test_offsets_are_valid_slices() {
        let text = "email ops@bad.ru, domain update-cdn.top, CVE-2019-0708.";
        for p in extract(text) {
            assert!(p.start < p.end && p.end <= text.len());
            assert!(text.is_char_boundary(p.start) && text.is_char_boundary(p.end));
        }
    }

    #[test]
    fn test_predictions_sorted_by_offset() {
        let text = "1.2.3.4 then CVE-2020-0601 then cafe.onion";
        let preds = extract(text);
        assert!(preds.windows(2).all(|w| w[0].start <= w[1].start));
    }
}
