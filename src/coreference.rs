//! Pronoun detection and coreference resolution
//!
//! Resolution runs as a small state machine: detect pronouns, try the
//! per-user binding store (most recent binding per pronoun wins), then fall
//! back to scanning conversation history newest-first. Store-backed
//! resolutions also drive query rewriting and the write-back contract.

use crate::config::{Pronoun, RouterConfig};
use crate::extraction::EntityExtractor;
use crate::models::{
    ConversationTurn, CoreferenceBinding, Entity, EntityKind, IntentAnalysisResult, Provenance,
    ResolvedPronoun,
};
use chrono::Utc;
use regex::{NoExpand, Regex, RegexBuilder};
use tracing::{debug, info, warn};

/// Confidence for store-backed pronoun resolutions
const STORE_CONFIDENCE: f32 = 0.95;

/// A pronoun surface form found in the current query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPronoun {
    pub surface: String,
    pub base: String,
}

struct CompiledPronoun {
    pronoun: Pronoun,
    boundary: Regex,
}

/// Resolves pronouns against stored bindings and conversation history
pub struct CoreferenceResolver {
    /// Sorted by surface length descending, so `its` rewrites before `it`
    pronouns: Vec<CompiledPronoun>,
}

impl CoreferenceResolver {
    pub fn new(config: &RouterConfig) -> Self {
        let mut pronouns: Vec<CompiledPronoun> = config
            .pronouns
            .iter()
            .filter_map(|p| {
                let source = format!(r"\b{}\b", regex::escape(&p.surface));
                match RegexBuilder::new(&source).case_insensitive(true).build() {
                    Ok(boundary) => Some(CompiledPronoun {
                        pronoun: p.clone(),
                        boundary,
                    }),
                    Err(e) => {
                        warn!("Skipping unmatchable pronoun {:?}: {}", p.surface, e);
                        None
                    }
                }
            })
            .collect();
        pronouns.sort_by(|a, b| b.pronoun.surface.len().cmp(&a.pronoun.surface.len()));

        Self { pronouns }
    }

    /// Pronoun surface forms present in `query`, word-boundary matched
    pub fn detect(&self, query: &str) -> Vec<DetectedPronoun> {
        let mut detected: Vec<DetectedPronoun> = Vec::new();
        for compiled in &self.pronouns {
            if compiled.boundary.is_match(query) {
                let hit = DetectedPronoun {
                    surface: compiled.pronoun.surface.clone(),
                    base: compiled.pronoun.base.clone(),
                };
                if !detected.contains(&hit) {
                    detected.push(hit);
                }
            }
        }
        detected
    }

    /// Resolve each distinct detected pronoun to its most recent stored
    /// binding. Bindings are filtered by base form and sorted by timestamp
    /// descending; the first match per pronoun wins.
    pub fn resolve_from_store(
        &self,
        detected: &[DetectedPronoun],
        bindings: &[CoreferenceBinding],
    ) -> Vec<ResolvedPronoun> {
        let bases = distinct_bases(detected);
        if bases.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<&CoreferenceBinding> = bindings
            .iter()
            .filter(|b| bases.iter().any(|base| *base == b.pronoun))
            .collect();
        candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut resolved = Vec::new();
        for base in &bases {
            if let Some(binding) = candidates.iter().find(|b| b.pronoun == *base) {
                resolved.push(ResolvedPronoun {
                    pronoun: base.clone(),
                    value: binding.value.clone(),
                    target: binding.target.clone(),
                    kind: binding.kind,
                    confidence: STORE_CONFIDENCE,
                });
            }
        }

        if !resolved.is_empty() {
            info!("Resolved {} pronoun(s) from stored bindings", resolved.len());
        }
        resolved
    }

    /// Whether store resolution covered every distinct detected pronoun
    pub fn fully_resolved(detected: &[DetectedPronoun], resolved: &[ResolvedPronoun]) -> bool {
        !detected.is_empty() && distinct_bases(detected).len() == resolved.len()
    }

    /// History-scan fallback: walk turns newest-first; the first turn that
    /// yields entities (attached metadata, then the query text, then the
    /// response text) supplies a coarse, non-per-pronoun resolution.
    pub fn scan_history(
        &self,
        extractor: &EntityExtractor,
        history: &[ConversationTurn],
    ) -> Vec<Entity> {
        for turn in history.iter().rev() {
            if let Some(metadata) = &turn.metadata {
                if !metadata.entities.is_empty() {
                    debug!("History scan hit turn metadata");
                    return restamp(metadata.entities.clone());
                }
            }

            let from_query = extractor.extract(&turn.query);
            if !from_query.is_empty() {
                debug!("History scan hit a prior query");
                return restamp(from_query);
            }

            let from_response = extractor.extract(&turn.response);
            if !from_response.is_empty() {
                debug!("History scan hit a prior response");
                return restamp(from_response);
            }
        }
        Vec::new()
    }

    /// Substitute each resolved pronoun's surface forms with its resolved
    /// value, longest surface first so overlapping forms never collide.
    /// Possessive forms render as `value + "'s"`.
    pub fn rewrite_query(&self, query: &str, resolved: &[ResolvedPronoun]) -> String {
        let mut rewritten = query.to_string();

        for compiled in &self.pronouns {
            let Some(resolution) = resolved
                .iter()
                .find(|r| r.pronoun == compiled.pronoun.base)
            else {
                continue;
            };

            let replacement = if compiled.pronoun.possessive {
                format!("{}'s", resolution.value)
            } else {
                resolution.value.clone()
            };

            if compiled.boundary.is_match(&rewritten) {
                debug!(
                    "Substituting pronoun {:?} with {:?}",
                    compiled.pronoun.surface, replacement
                );
                rewritten = compiled
                    .boundary
                    .replace_all(&rewritten, NoExpand(&replacement))
                    .into_owned();
            }
        }

        rewritten
    }

    /// Write-back contract for the session layer: persist exactly the
    /// per-pronoun resolutions when there are any; otherwise seed a
    /// default-pronoun binding per referable entity the current turn
    /// extracted, so a future pronoun can resolve to it.
    pub fn bindings_to_persist(
        &self,
        default_pronoun: &str,
        result: &IntentAnalysisResult,
    ) -> Vec<CoreferenceBinding> {
        let now = Utc::now();

        if !result.resolved_pronouns.is_empty() {
            return result
                .resolved_pronouns
                .iter()
                .map(|r| CoreferenceBinding {
                    pronoun: r.pronoun.clone(),
                    kind: r.kind,
                    target: r.target.clone(),
                    value: r.value.clone(),
                    timestamp: now,
                })
                .collect();
        }

        result
            .entities
            .iter()
            .filter(|e| is_referable(e))
            .map(|e| CoreferenceBinding {
                pronoun: default_pronoun.to_string(),
                kind: e.kind,
                target: e.value.clone(),
                value: e.display_name.clone(),
                timestamp: now,
            })
            .collect()
    }
}

/// Entities a later pronoun can sensibly refer back to, newly found in
/// the current turn
fn is_referable(entity: &Entity) -> bool {
    let current_turn = matches!(
        entity.provenance,
        Provenance::Dictionary | Provenance::NumericHeuristic | Provenance::ExternalClassifier
    );
    current_turn && entity.kind != EntityKind::Economic
}

fn distinct_bases(detected: &[DetectedPronoun]) -> Vec<String> {
    let mut bases: Vec<String> = Vec::new();
    for d in detected {
        if !bases.contains(&d.base) {
            bases.push(d.base.clone());
        }
    }
    bases
}

/// Convert resolutions into result entities, annotated with their pronoun
pub fn entities_from_resolutions(resolved: &[ResolvedPronoun]) -> Vec<Entity> {
    resolved
        .iter()
        .map(|r| {
            let mut entity = Entity::new(
                r.kind,
                r.target.clone(),
                r.value.clone(),
                r.confidence,
                Provenance::CoreferenceStore,
            );
            entity.pronoun = Some(r.pronoun.clone());
            entity
        })
        .collect()
}

fn restamp(entities: Vec<Entity>) -> Vec<Entity> {
    entities
        .into_iter()
        .map(|mut e| {
            e.provenance = Provenance::HistoryScan;
            e
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::dictionary::EntityDictionary;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn resolver() -> CoreferenceResolver {
        CoreferenceResolver::new(&RouterConfig::default())
    }

    fn binding(pronoun: &str, value: &str, target: &str, age_secs: i64) -> CoreferenceBinding {
        CoreferenceBinding {
            pronoun: pronoun.to_string(),
            kind: EntityKind::Stock,
            target: target.to_string(),
            value: value.to_string(),
            timestamp: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_detect_word_boundaries() {
        let resolver = resolver();
        assert!(resolver.detect("is the item in stock?").is_empty());

        let detected = resolver.detect("What is its price?");
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].surface, "its");
        assert_eq!(detected[0].base, "it");
    }

    #[test]
    fn test_no_pronoun_returns_empty_resolution() {
        let resolver = resolver();
        let detected = resolver.detect("price of Moutai");
        assert!(detected.is_empty());
        assert!(resolver
            .resolve_from_store(&detected, &[binding("it", "Moutai", "600519.SS", 10)])
            .is_empty());
    }

    #[test]
    fn test_most_recent_binding_wins() {
        let resolver = resolver();
        let detected = resolver.detect("how is it doing?");

        let bindings = vec![
            binding("it", "Foo Corp", "FOO.XX", 120),
            binding("it", "Bar Inc", "BAR.XX", 5),
        ];
        let resolved = resolver.resolve_from_store(&detected, &bindings);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].pronoun, "it");
        assert_eq!(resolved[0].value, "Bar Inc");
        assert_eq!(resolved[0].target, "BAR.XX");
        assert_eq!(resolved[0].confidence, 0.95);
    }

    #[test]
    fn test_one_resolution_per_distinct_pronoun() {
        let resolver = resolver();
        let detected = resolver.detect("compare it with that one");

        let bindings = vec![
            binding("it", "Foo Corp", "FOO.XX", 60),
            binding("that", "Bar Inc", "BAR.XX", 30),
            binding("it", "Baz Ltd", "BAZ.XX", 10),
        ];
        let resolved = resolver.resolve_from_store(&detected, &bindings);

        assert_eq!(resolved.len(), 2);
        let it = resolved.iter().find(|r| r.pronoun == "it").unwrap();
        assert_eq!(it.value, "Baz Ltd");
        let that = resolved.iter().find(|r| r.pronoun == "that").unwrap();
        assert_eq!(that.value, "Bar Inc");
    }

    #[test]
    fn test_rewrite_substitutes_possessive_forms_first() {
        let resolver = resolver();
        let resolved = vec![ResolvedPronoun {
            pronoun: "it".to_string(),
            value: "Foo Corp".to_string(),
            target: "FOO.XX".to_string(),
            kind: EntityKind::Stock,
            confidence: 0.95,
        }];

        assert_eq!(
            resolver.rewrite_query("What is its price?", &resolved),
            "What is Foo Corp's price?"
        );
        assert_eq!(
            resolver.rewrite_query("is it still rising? buy it?", &resolved),
            "is Foo Corp still rising? buy Foo Corp?"
        );
    }

    #[test]
    fn test_rewrite_leaves_unresolved_pronouns_alone() {
        let resolver = resolver();
        assert_eq!(
            resolver.rewrite_query("What is its price?", &[]),
            "What is its price?"
        );
    }

    #[test]
    fn test_history_scan_prefers_newest_turn() {
        let resolver = resolver();
        let dict = EntityDictionary::from_tables(
            vec![
                ("Foo Corp".to_string(), "FOO.XX".to_string()),
                ("Bar Inc".to_string(), "BAR.XX".to_string()),
            ],
            Vec::new(),
        );
        let extractor = EntityExtractor::new(Arc::new(dict));

        let history = vec![
            ConversationTurn::new("tell me about Foo Corp", "Foo Corp is up 2%"),
            ConversationTurn::new("and Bar Inc?", "Bar Inc fell slightly"),
        ];
        let entities = resolver.scan_history(&extractor, &history);

        assert!(!entities.is_empty());
        assert_eq!(entities[0].value, "BAR.XX");
        assert_eq!(entities[0].provenance, Provenance::HistoryScan);
    }

    #[test]
    fn test_history_scan_checks_metadata_before_text() {
        let resolver = resolver();
        let extractor = EntityExtractor::new(Arc::new(EntityDictionary::from_tables(
            Vec::new(),
            Vec::new(),
        )));

        let attached = Entity::new(
            EntityKind::Stock,
            "FOO.XX",
            "Foo Corp",
            0.9,
            Provenance::Dictionary,
        );
        let history = vec![
            ConversationTurn::new("anything good?", "maybe").with_entities(vec![attached]),
        ];

        let entities = resolver.scan_history(&extractor, &history);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].value, "FOO.XX");
    }

    #[test]
    fn test_write_back_prefers_resolved_pronouns() {
        let resolver = resolver();
        let mut result = IntentAnalysisResult::general("what about it?");
        result.resolved_pronouns = vec![ResolvedPronoun {
            pronoun: "it".to_string(),
            value: "Foo Corp".to_string(),
            target: "FOO.XX".to_string(),
            kind: EntityKind::Stock,
            confidence: 0.95,
        }];
        result.entities = vec![Entity::new(
            EntityKind::Stock,
            "BAR.XX",
            "Bar Inc",
            0.9,
            Provenance::Dictionary,
        )];

        let bindings = resolver.bindings_to_persist("it", &result);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].target, "FOO.XX");
    }

    #[test]
    fn test_write_back_seeds_default_pronoun_for_new_entities() {
        let resolver = resolver();
        let mut result = IntentAnalysisResult::general("price of Foo Corp");
        result.entities = vec![
            Entity::new(EntityKind::Stock, "FOO.XX", "Foo Corp", 0.9, Provenance::Dictionary),
            // Store-backed entities are not re-persisted
            Entity::new(
                EntityKind::Stock,
                "BAR.XX",
                "Bar Inc",
                0.95,
                Provenance::CoreferenceStore,
            ),
            // Economic indicators are not referable
            Entity::new(EntityKind::Economic, "GDP", "GDP", 0.9, Provenance::Dictionary),
        ];

        let bindings = resolver.bindings_to_persist("it", &result);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].pronoun, "it");
        assert_eq!(bindings[0].target, "FOO.XX");
        assert_eq!(bindings[0].value, "Foo Corp");
    }
}
