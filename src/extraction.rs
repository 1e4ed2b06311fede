//! Entity extraction from query text
//!
//! Word-aware dictionary matching plus a bare-code heuristic. Emits raw
//! hits; duplicate suppression is the caller's responsibility.

use crate::dictionary::{classify_bare_code, EntityDictionary};
use crate::models::{Entity, EntityKind, Provenance};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    /// Bare 6-digit sequences; boundaries reject runs embedded in longer
    /// alphanumeric tokens.
    static ref BARE_CODE: Regex = Regex::new(r"\b\d{6}\b").expect("bare-code regex");
}

/// Confidence assigned to dictionary hits
const DICTIONARY_CONFIDENCE: f32 = 0.9;
/// Confidence assigned to bare numeric codes
const NUMERIC_CONFIDENCE: f32 = 0.6;

/// Words filtered out of the keyword summary
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "what", "how", "this", "that", "with", "from",
    "about", "are", "was", "has", "have", "its", "does", "did", "will",
    "can", "you", "your", "than", "then", "into", "out", "not", "but",
    "all", "any", "much", "many",
];

/// Matches query tokens and phrases against the entity dictionary
pub struct EntityExtractor {
    dictionary: Arc<EntityDictionary>,
}

impl EntityExtractor {
    pub fn new(dictionary: Arc<EntityDictionary>) -> Self {
        Self { dictionary }
    }

    /// Extract all dictionary and numeric-code entities from `text`
    pub fn extract(&self, text: &str) -> Vec<Entity> {
        let mut entities = Vec::new();
        let lowered = text.to_lowercase();

        for (name, kind, code) in self.dictionary.names() {
            if contains_word(&lowered, &name.to_lowercase()) {
                entities.push(Entity::new(
                    kind,
                    code,
                    name,
                    DICTIONARY_CONFIDENCE,
                    Provenance::Dictionary,
                ));
            }
        }

        for m in BARE_CODE.find_iter(text) {
            let code = m.as_str();
            entities.push(Entity::new(
                EntityKind::StockCode,
                classify_bare_code(code),
                format!("stock {}", code),
                NUMERIC_CONFIDENCE,
                Provenance::NumericHeuristic,
            ));
        }

        entities
    }
}

/// Substring search with word-boundary checks on ASCII-alphanumeric edges,
/// so short names never match inside longer tokens.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let first_bounded = needle.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let last_bounded = needle
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_alphanumeric());

    let mut from = 0;
    while let Some(rel) = haystack[from..].find(needle) {
        let start = from + rel;
        let end = start + needle.len();

        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        let before_ok = !first_bounded || before.map_or(true, |c| !c.is_ascii_alphanumeric());
        let after_ok = !last_bounded || after.map_or(true, |c| !c.is_ascii_alphanumeric());

        if before_ok && after_ok {
            return true;
        }
        from = start + needle.len();
    }

    false
}

/// Top recurring content words of a query, most frequent first
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();

    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        if raw.len() <= 2 {
            continue;
        }
        let word = raw.to_lowercase();
        if STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        match counts.iter_mut().find(|(w, _)| *w == word) {
            Some((_, n)) => *n += 1,
            None => counts.push((word, 1)),
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(5);
    counts.into_iter().map(|(w, _)| w).collect()
}
