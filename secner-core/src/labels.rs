//! # Entity Taxonomy and BIO Tag Scheme
//!
//! Defines the fixed set of cybersecurity entity classes recognized by the
//! pipeline and the **BIO** (Beginning-Inside-Outside) annotation scheme used
//! to label individual model tokens.
//!
//! ## Entity classes
//!
//! | Class   | Meaning                    | Examples                          |
//! |---------|----------------------------|-----------------------------------|
//! | APT     | Advanced Persistent Threat | APT28, Lazarus Group              |
//! | MAL     | Malware                    | Emotet, GandCrab                  |
//! | TOOL    | Tool / Software            | Mimikatz, PowerSploit             |
//! | VULID   | Vulnerability ID           | CVE-2021-44228                    |
//! | IP      | IP Address                 | 185.220.101.4                     |
//! | SHA2    | SHA-256 Hash               | 64 hex characters                 |
//! | O       | Outside any entity         | (every other word)                |
//!
//! ## BIO scheme
//!
//! - `B-TAG`: Begin — first token of an entity
//! - `I-TAG`: Inside — subsequent tokens of the same entity
//! - `O`: Outside — not part of any entity

use serde::{Deserialize, Serialize};

/// Entity classes recognized by the pipeline.
///
/// This is the taxonomy of the active model (SecureBERT-NER style). Adding a
/// class means adding a variant here plus its description and color; nothing
/// else in the pipeline needs to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityClass {
    /// Time reference. Ex: "March 2023", "last quarter".
    Time,
    /// Location. Ex: "Ukraine", "Eastern Europe".
    Loc,
    /// Security team or vendor. Ex: "Mandiant", "Unit 42".
    SecTeam,
    /// Tool / software, benign or dual-use. Ex: "Mimikatz", "Cobalt Strike".
    Tool,
    /// Identity / person / organization being targeted. Ex: "Microsoft".
    Idty,
    /// Malware family or sample. Ex: "Emotet", "GandCrab".
    Mal,
    /// Advanced Persistent Threat group. Ex: "APT28", "Lazarus".
    Apt,
    /// Named vulnerability. Ex: "Log4Shell", "EternalBlue".
    VulName,
    /// Vulnerability identifier. Ex: "CVE-2021-44228".
    VulId,
    /// Encryption algorithm or scheme. Ex: "AES-256", "RC4".
    Encr,
    /// File name or path. Ex: "invoice.exe", "payload.dll".
    File,
    /// SHA-256 hash (64 hex chars).
    Sha2,
    /// URL. Ex: "http://malicious.example/payload".
    Url,
    /// IP address. Ex: "185.220.101.4".
    Ip,
    /// Action / activity. Ex: "spearphishing", "lateral movement".
    Act,
    /// MD5 hash (32 hex chars).
    Md5,
    /// Domain name. Ex: "update-server.top".
    Dom,
    /// Operating system. Ex: "Windows 10", "Linux".
    Os,
    /// SHA-1 hash (40 hex chars).
    Sha1,
    /// Email address.
    Email,
    /// Network protocol. Ex: "SMB", "HTTPS".
    Prot,
}

impl EntityClass {
    /// All classes in declaration order (for iteration and label tables).
    pub const ALL: [EntityClass; 21] = [
        EntityClass::Time,
        EntityClass::Loc,
        EntityClass::SecTeam,
        EntityClass::Tool,
        EntityClass::Idty,
        EntityClass::Mal,
        EntityClass::Apt,
        EntityClass::VulName,
        EntityClass::VulId,
        EntityClass::Encr,
        EntityClass::File,
        EntityClass::Sha2,
        EntityClass::Url,
        EntityClass::Ip,
        EntityClass::Act,
        EntityClass::Md5,
        EntityClass::Dom,
        EntityClass::Os,
        EntityClass::Sha1,
        EntityClass::Email,
        EntityClass::Prot,
    ];

    /// Short class name as emitted by the model (for tags and serialization).
    pub fn name(&self) -> &'static str {
        match self {
            EntityClass::Time => "TIME",
            EntityClass::Loc => "LOC",
            EntityClass::SecTeam => "SECTEAM",
            EntityClass::Tool => "TOOL",
            EntityClass::Idty => "IDTY",
            EntityClass::Mal => "MAL",
            EntityClass::Apt => "APT",
            EntityClass::VulName => "VULNAME",
            EntityClass::VulId => "VULID",
            EntityClass::Encr => "ENCR",
            EntityClass::File => "FILE",
            EntityClass::Sha2 => "SHA2",
            EntityClass::Url => "URL",
            EntityClass::Ip => "IP",
            EntityClass::Act => "ACT",
            EntityClass::Md5 => "MD5",
            EntityClass::Dom => "DOM",
            EntityClass::Os => "OS",
            EntityClass::Sha1 => "SHA1",
            EntityClass::Email => "EMAIL",
            EntityClass::Prot => "PROT",
        }
    }

    /// Human-readable description shown in report tables.
    pub fn description(&self) -> &'static str {
        match self {
            EntityClass::Time => "Time Reference",
            EntityClass::Loc => "Location",
            EntityClass::SecTeam => "Security Team",
            EntityClass::Tool => "Tool / Software",
            EntityClass::Idty => "Identity / Person",
            EntityClass::Mal => "Malware",
            EntityClass::Apt => "Advanced Persistent Threat",
            EntityClass::VulName => "Vulnerability Name",
            EntityClass::VulId => "Vulnerability ID",
            EntityClass::Encr => "Encryption Method",
            EntityClass::File => "File",
            EntityClass::Sha2 => "SHA-256 Hash",
            EntityClass::Url => "URL",
            EntityClass::Ip => "IP Address",
            EntityClass::Act => "Action / Activity",
            EntityClass::Md5 => "MD5 Hash",
            EntityClass::Dom => "Domain",
            EntityClass::Os => "Operating System",
            EntityClass::Sha1 => "SHA-1 Hash",
            EntityClass::Email => "Email Address",
            EntityClass::Prot => "Protocol",
        }
    }

    /// Hex accent color for UI badges and charts.
    pub fn color(&self) -> &'static str {
        match self {
            EntityClass::Time => "#60a5fa",
            EntityClass::Loc => "#34d399",
            EntityClass::SecTeam => "#f472b6",
            EntityClass::Tool => "#fb923c",
            EntityClass::Idty => "#a78bfa",
            EntityClass::Mal => "#f87171",
            EntityClass::Apt => "#ef4444",
            EntityClass::VulName => "#facc15",
            EntityClass::VulId => "#fbbf24",
            EntityClass::Encr => "#818cf8",
            EntityClass::File => "#94a3b8",
            EntityClass::Sha2 => "#22d3ee",
            EntityClass::Url => "#4ade80",
            EntityClass::Ip => "#2dd4bf",
            EntityClass::Act => "#c084fc",
            EntityClass::Md5 => "#38bdf8",
            EntityClass::Dom => "#86efac",
            EntityClass::Os => "#fdba74",
            EntityClass::Sha1 => "#67e8f9",
            EntityClass::Email => "#d946ef",
            EntityClass::Prot => "#a3e635",
        }
    }

    /// Parses a class from its short name, case-insensitively
    /// (ex: "MAL", "Mal" → Some(Mal)).
    pub fn from_name(s: &str) -> Option<Self> {
        EntityClass::ALL
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .copied()
    }

    /// Classes whose surface text never contains internal spaces
    /// (identifiers, hashes, addresses). Sub-word tokenizers sometimes
    /// fragment these with spaces; the normalizer collapses them back.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            EntityClass::VulId
                | EntityClass::Sha1
                | EntityClass::Sha2
                | EntityClass::Md5
                | EntityClass::File
                | EntityClass::Url
                | EntityClass::Email
                | EntityClass::Ip
                | EntityClass::Dom
        )
    }

    /// Classes where a two-part CamelCase surface is almost always one
    /// compound name ("Power Sploit" → "PowerSploit", "Hyper Bro" → "HyperBro").
    pub fn is_compound_name(&self) -> bool {
        matches!(
            self,
            EntityClass::Tool | EntityClass::Mal | EntityClass::Apt | EntityClass::Encr
        )
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// BIO tag applied to one model token.
///
/// The BIO scheme lets multi-token entities be represented token by token.
/// The inference provider emits one raw tag string per token; `Tag::parse`
/// turns it into this structured form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    /// **Begin**: first token of an entity. Ex: **Emotet** (B-MAL) Loader.
    Begin(EntityClass),
    /// **Inside**: continuation of an entity. Ex: Emotet **Loader** (I-MAL).
    Inside(EntityClass),
    /// **Outside**: the token is not part of any entity.
    Outside,
}

impl Tag {
    /// Textual representation (ex: "B-MAL", "I-APT", "O").
    pub fn label(&self) -> String {
        match self {
            Tag::Begin(class) => format!("B-{}", class.name()),
            Tag::Inside(class) => format!("I-{}", class.name()),
            Tag::Outside => "O".to_string(),
        }
    }

    /// Parses a raw tag string (ex: "B-MAL" → Begin(Mal)).
    ///
    /// Accepts mixed-case class names since different model exports disagree
    /// on casing ("B-Mal" vs "B-MAL"). Returns `None` for tags outside the
    /// taxonomy; callers treat those as [`Tag::Outside`] and log them.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "O" || s.eq_ignore_ascii_case("o") {
            return Some(Tag::Outside);
        }
        let (prefix, name) = s.split_once('-')?;
        let class = EntityClass::from_name(name)?;
        match prefix {
            "B" | "b" => Some(Tag::Begin(class)),
            "I" | "i" => Some(Tag::Inside(class)),
            _ => None,
        }
    }

    /// The entity class of this tag, if it is B- or I-.
    pub fn class(&self) -> Option<EntityClass> {
        match self {
            Tag::Begin(c) | Tag::Inside(c) => Some(*c),
            Tag::Outside => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_labels() {
        assert_eq!(Tag::Outside.label(), "O");
        assert_eq!(Tag::Begin(EntityClass::Mal).label(), "B-MAL");
        assert_eq!(Tag::Inside(EntityClass::Apt).label(), "I-APT");
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!(Tag::parse("O"), Some(Tag::Outside));
        assert_eq!(Tag::parse("B-MAL"), Some(Tag::Begin(EntityClass::Mal)));
        assert_eq!(Tag::parse("I-SECTEAM"), Some(Tag::Inside(EntityClass::SecTeam)));
        // Mixed-case model exports
        assert_eq!(Tag::parse("B-Mal"), Some(Tag::Begin(EntityClass::Mal)));
        assert_eq!(Tag::parse("I-VulId"), Some(Tag::Inside(EntityClass::VulId)));
        // Outside the taxonomy
        assert_eq!(Tag::parse("B-PERSON"), None);
        assert_eq!(Tag::parse("MAL"), None);
    }

    #[test]
    fn test_class_names_roundtrip() {
        for class in EntityClass::ALL {
            assert_eq!(EntityClass::from_name(class.name()), Some(class));
        }
        assert_eq!(EntityClass::from_name("secteam"), Some(EntityClass::SecTeam));
        assert_eq!(EntityClass::from_name("NOPE"), None);
    }

    #[test]
    fn test_class_serde_names() {
        let json = serde_json::to_string(&EntityClass::VulName).unwrap();
        assert_eq!(json, "\"VULNAME\"");
        let back: EntityClass = serde_json::from_str("\"SHA2\"").unwrap();
        assert_eq!(back, EntityClass::Sha2);
    }

    #[test]
    fn test_structured_classes() {
        assert!(EntityClass::Sha2.is_structured());
        assert!(EntityClass::VulId.is_structured());
        assert!(!EntityClass::Mal.is_structured());
        assert!(EntityClass::Mal.is_compound_name());
        assert!(!EntityClass::Ip.is_compound_name());
    }
}
