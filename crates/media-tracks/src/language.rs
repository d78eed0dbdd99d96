//! BCP-47 language tags and the "close enough" matching used for track selection.
//!
//! Matching is intentionally coarse: region variants of the same base language
//! (`en`, `en-US`, `en-AU`) are treated as equivalent, script differences are not.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Maximum distance at which two languages are considered the same.
pub const LANGUAGE_MAX_DISTANCE: u32 = 5;

/// Sentinel subtag meaning "every language".
pub const ALL_LANGUAGES: &str = "all";

const DISTANCE_REGION: u32 = 4;
const DISTANCE_SCRIPT: u32 = 10;
const DISTANCE_LANGUAGE: u32 = 100;

/// A normalised BCP-47 language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language {
    primary: String,
    script: Option<String>,
    region: Option<String>,
    variants: Vec<String>,
}

impl Language {
    /// The `all` sentinel.
    pub fn all() -> Self {
        Self {
            primary: ALL_LANGUAGES.to_string(),
            script: None,
            region: None,
            variants: Vec::new(),
        }
    }

    /// A tag made of a primary language subtag only, such as `en`.
    pub fn from_primary(primary: &str) -> Self {
        Self {
            primary: primary.to_ascii_lowercase(),
            script: None,
            region: None,
            variants: Vec::new(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.primary == ALL_LANGUAGES
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Script implied by the tag, falling back to well-known defaults for
    /// languages whose regions select a script.
    fn effective_script(&self) -> Option<&str> {
        if let Some(script) = self.script.as_deref() {
            return Some(script);
        }
        match (self.primary.as_str(), self.region.as_deref()) {
            ("zh", Some("TW" | "HK" | "MO")) => Some("Hant"),
            ("zh", _) => Some("Hans"),
            _ => None,
        }
    }

    /// Distance between two tags. Zero means identical for matching purposes.
    pub fn distance(&self, other: &Language) -> u32 {
        if self.is_all() || other.is_all() || self.primary != other.primary {
            return DISTANCE_LANGUAGE;
        }

        let mut distance = 0;
        if let (Some(a), Some(b)) = (self.effective_script(), other.effective_script())
            && a != b
        {
            distance += DISTANCE_SCRIPT;
        }
        if let (Some(a), Some(b)) = (self.region.as_deref(), other.region.as_deref())
            && a != b
        {
            distance += DISTANCE_REGION;
        }
        distance
    }

    /// Whether this language is within [`LANGUAGE_MAX_DISTANCE`] of `other`.
    pub fn is_close_to(&self, other: &Language) -> bool {
        self.distance(other) <= LANGUAGE_MAX_DISTANCE
    }
}

/// Whether `language` closely matches any of `candidates`.
///
/// The `all` sentinel never matches; callers check for it explicitly.
pub fn is_close_match(language: &Language, candidates: &[Language]) -> bool {
    candidates.iter().any(|c| language.is_close_to(c))
}

/// Whether a list of requested languages contains the `all` sentinel.
pub fn contains_all(languages: &[Language]) -> bool {
    languages.iter().any(Language::is_all)
}

impl FromStr for Language {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(ALL_LANGUAGES) {
            return Ok(Self::all());
        }

        let mut subtags = trimmed.split(['-', '_']);
        let primary = subtags
            .next()
            .filter(|p| (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic()))
            .ok_or_else(|| TrackError::InvalidLanguage(s.to_string()))?
            .to_ascii_lowercase();

        let mut language = Self {
            primary,
            script: None,
            region: None,
            variants: Vec::new(),
        };

        for subtag in subtags {
            if subtag.is_empty() {
                return Err(TrackError::InvalidLanguage(s.to_string()));
            }
            let alphabetic = subtag.chars().all(|c| c.is_ascii_alphabetic());
            let numeric = subtag.chars().all(|c| c.is_ascii_digit());
            if language.script.is_none()
                && language.region.is_none()
                && subtag.len() == 4
                && alphabetic
            {
                let mut script = subtag.to_ascii_lowercase();
                script[..1].make_ascii_uppercase();
                language.script = Some(script);
            } else if language.region.is_none()
                && language.variants.is_empty()
                && ((subtag.len() == 2 && alphabetic) || (subtag.len() == 3 && numeric))
            {
                language.region = Some(subtag.to_ascii_uppercase());
            } else {
                language.variants.push(subtag.to_ascii_lowercase());
            }
        }

        Ok(language)
    }
}

impl TryFrom<String> for Language {
    type Error = TrackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.primary)?;
        if let Some(script) = &self.script {
            write!(f, "-{script}")?;
        }
        if let Some(region) = &self.region {
            write!(f, "-{region}")?;
        }
        for variant in &self.variants {
            write!(f, "-{variant}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang(tag: &str) -> Language {
        tag.parse().unwrap()
    }

    #[test]
    fn test_parse_normalises_case() {
        let l = lang("ZH_hant_tw");
        assert_eq!(l.to_string(), "zh-Hant-TW");
        assert_eq!(l.script(), Some("Hant"));
        assert_eq!(l.region(), Some("TW"));
    }

    #[test]
    fn test_parse_numeric_region() {
        assert_eq!(lang("es-419").region(), Some("419"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Language>().is_err());
        assert!("english".parse::<Language>().is_err());
        assert!("en--US".parse::<Language>().is_err());
    }

    #[test]
    fn test_all_sentinel() {
        let all = lang("ALL");
        assert!(all.is_all());
        assert!(contains_all(&[lang("en"), all.clone()]));
        assert!(!is_close_match(&lang("en"), &[all]));
    }

    #[test]
    fn test_region_variants_are_close() {
        assert!(lang("en").is_close_to(&lang("en-US")));
        assert!(lang("en-AU").is_close_to(&lang("en-GB")));
        assert_eq!(lang("en-US").distance(&lang("en-US")), 0);
    }

    #[test]
    fn test_script_and_language_differences_are_far() {
        assert!(!lang("zh-TW").is_close_to(&lang("zh-CN")));
        assert!(!lang("zh-Hant").is_close_to(&lang("zh-Hans")));
        assert!(!lang("en").is_close_to(&lang("fr")));
        assert!(lang("zh").is_close_to(&lang("zh-CN")));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&lang("pt-br")).unwrap();
        assert_eq!(json, "\"pt-BR\"");
        let back: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lang("pt-BR"));
    }
}
