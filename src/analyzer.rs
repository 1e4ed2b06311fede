//! Query analysis orchestrator
//!
//! Sequences the fallback chain for one `analyze()` call:
//!
//! QUERY → STORE BINDINGS → EXTERNAL CLASSIFIER → LOCAL SCORING → HISTORY SCAN → RESULT
//!
//! Each tier is strictly sequential and deterministic; any internal failure
//! degrades the whole result to the `general` fallback instead of
//! propagating to the caller.

use crate::config::{IntentCategory, RouterConfig};
use crate::coreference::{entities_from_resolutions, CoreferenceResolver};
use crate::dictionary::EntityDictionary;
use crate::extraction::{extract_keywords, EntityExtractor};
use crate::llm::ExternalClassifier;
use crate::models::{
    dedup_entities, ConversationTurn, CoreferenceBinding, Entity, EntityKind,
    IntentAnalysisResult, GENERAL_INTENT,
};
use crate::scoring::{combine_scores, keyword_scores, pick_winner, PatternMatcher};
use std::sync::{Arc, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Stateless-per-call intent and coreference analyzer.
///
/// Shared state is limited to the configuration and the entity dictionary,
/// both read-only after construction; a dictionary reload swaps the whole
/// `Arc` atomically.
pub struct IntentAnalyzer {
    config: Arc<RouterConfig>,
    dictionary: RwLock<Arc<EntityDictionary>>,
    matcher: PatternMatcher,
    resolver: CoreferenceResolver,
    classifier: Option<Arc<dyn ExternalClassifier>>,
}

impl IntentAnalyzer {
    pub fn new(config: Arc<RouterConfig>, dictionary: Arc<EntityDictionary>) -> Self {
        let matcher = PatternMatcher::new(&config);
        let resolver = CoreferenceResolver::new(&config);
        Self {
            config,
            dictionary: RwLock::new(dictionary),
            matcher,
            resolver,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ExternalClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Current dictionary snapshot
    pub fn dictionary(&self) -> Arc<EntityDictionary> {
        match self.dictionary.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the dictionary with a freshly built one
    pub fn swap_dictionary(&self, dictionary: Arc<EntityDictionary>) {
        let mut guard = match self.dictionary.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = dictionary;
        info!("Entity dictionary swapped");
    }

    /// Analyze one utterance against the caller-supplied turn history and
    /// stored coreference bindings. Never fails: the worst case is an
    /// unclassified `general` result carrying the internal error message.
    pub async fn analyze(
        &self,
        query: &str,
        history: &[ConversationTurn],
        coreferences: &[CoreferenceBinding],
    ) -> IntentAnalysisResult {
        match self.try_analyze(query, history, coreferences).await {
            Ok(result) => result,
            Err(e) => {
                error!("Intent analysis failed: {}", e);
                IntentAnalysisResult::degraded(query, e.to_string())
            }
        }
    }

    async fn try_analyze(
        &self,
        query: &str,
        history: &[ConversationTurn],
        coreferences: &[CoreferenceBinding],
    ) -> crate::Result<IntentAnalysisResult> {
        let config = &self.config;
        let dictionary = self.dictionary();
        let extractor = EntityExtractor::new(dictionary.clone());
        let mut result = IntentAnalysisResult::general(query);

        // Store-backed pronoun resolution
        let detected = self.resolver.detect(query);
        let resolved = self.resolver.resolve_from_store(&detected, coreferences);
        let fully_resolved = CoreferenceResolver::fully_resolved(&detected, &resolved);
        let store_entities = entities_from_resolutions(&resolved);
        result.resolved_pronouns = resolved;

        // External classifier, unless the store already answered everything
        let mut classifier_outcome = None;
        if !fully_resolved {
            if let Some(classifier) = &self.classifier {
                let formatted = format_history(history, coreferences);
                match timeout(
                    config.classifier_deadline,
                    consult(classifier.as_ref(), query, &formatted),
                )
                .await
                {
                    Ok(Ok(outcome)) => classifier_outcome = Some(outcome),
                    Ok(Err(e)) => {
                        warn!("External classifier failed, using local scoring: {}", e)
                    }
                    Err(_) => warn!(
                        "External classifier missed its {:?} deadline, using local scoring",
                        config.classifier_deadline
                    ),
                }
            }
        }

        let mut entities;
        let mut local_scores = None;

        match classifier_outcome {
            Some((intent, confidence, classifier_entities)) => {
                info!(
                    "External classifier answered: {} ({:.2})",
                    intent, confidence
                );
                result.external_classifier_used = true;
                result.primary_intent = if intent.is_empty() {
                    GENERAL_INTENT.to_string()
                } else {
                    intent
                };
                result.confidence = confidence.clamp(0.0, 1.0);
                entities = canonicalize(&dictionary, classifier_entities);
            }
            None => {
                local_scores = Some((
                    keyword_scores(config, query),
                    self.matcher.pattern_scores(query),
                ));
                entities = extractor.extract(query);
            }
        }

        entities.extend(store_entities);
        let mut entities = dedup_entities(entities);

        // History-scan fallback: a pronoun with nothing to point at
        if !detected.is_empty() && entities.is_empty() {
            info!("Pronoun detected with no resolution, scanning history");
            entities = self.resolver.scan_history(&extractor, history);
        }

        // Local scoring uses the final entity count for its boost
        if let Some((keyword, pattern)) = &local_scores {
            let combined = combine_scores(config, keyword, pattern, entities.len());
            if let Some((intent, confidence)) = pick_winner(config, &combined) {
                result.primary_intent = intent;
                result.confidence = confidence;
            }
        }

        result.entities = entities;
        derive_targets(&mut result);

        let intent_name = result.primary_intent.clone();
        if let Some(category) = config.category(&intent_name) {
            apply_category(&mut result, category);
        }

        result.keywords = extract_keywords(query);
        result.resolved_query = self
            .resolver
            .rewrite_query(query, &result.resolved_pronouns);

        Ok(result)
    }

    /// Bindings the session layer should persist for this result
    pub fn bindings_to_persist(&self, result: &IntentAnalysisResult) -> Vec<CoreferenceBinding> {
        self.resolver
            .bindings_to_persist(&self.config.default_pronoun, result)
    }
}

async fn consult(
    classifier: &dyn ExternalClassifier,
    query: &str,
    history: &str,
) -> crate::Result<(String, f32, Vec<Entity>)> {
    let (intent, confidence) = classifier.classify(query, history).await?;
    let entities = classifier.extract_entities(query, history).await?;
    Ok((intent, confidence, entities))
}

/// Swap classifier-supplied display names for canonical codes where the
/// dictionary knows them
fn canonicalize(dictionary: &EntityDictionary, entities: Vec<Entity>) -> Vec<Entity> {
    entities
        .into_iter()
        .map(|mut e| {
            let code = match e.kind {
                EntityKind::Stock => dictionary.lookup_stock(&e.display_name),
                EntityKind::Index => dictionary.lookup_index(&e.display_name),
                _ => None,
            };
            if let Some(code) = code {
                e.value = code.to_string();
            }
            e
        })
        .collect()
}

fn derive_targets(result: &mut IntentAnalysisResult) {
    for entity in &result.entities {
        match entity.kind {
            EntityKind::Stock | EntityKind::StockCode => {
                if !result.target_symbols.contains(&entity.value) {
                    result.target_symbols.push(entity.value.clone());
                }
            }
            EntityKind::Index => {
                if !result.target_indices.contains(&entity.value) {
                    result.target_indices.push(entity.value.clone());
                }
            }
            _ => {}
        }
    }
}

/// Copy the winning category's static flags into the result, and its
/// default targets wherever extraction left them empty
fn apply_category(result: &mut IntentAnalysisResult, category: &IntentCategory) {
    result.needs_realtime_data = category.needs_realtime_data;
    result.needs_knowledge_base = category.needs_knowledge_base;
    result.needs_historical_context = category.needs_historical_context;
    result.is_simple_time_query = category.is_simple_time_query;

    if result.target_indices.is_empty() && !category.target_indices.is_empty() {
        result.target_indices = category.target_indices.clone();
    }
    if result.economic_indicators.is_empty() && !category.economic_indicators.is_empty() {
        result.economic_indicators = category.economic_indicators.clone();
    }
}

fn format_history(history: &[ConversationTurn], coreferences: &[CoreferenceBinding]) -> String {
    let mut formatted = String::new();

    if !coreferences.is_empty() {
        formatted.push_str("[Pronoun bindings]\n");
        for binding in coreferences {
            formatted.push_str(&format!(
                "pronoun '{}' refers to '{}' ({})\n",
                binding.pronoun, binding.value, binding.kind
            ));
        }
    }

    for (i, turn) in history.iter().enumerate() {
        formatted.push_str(&format!(
            "User[{}]: {}\nAssistant[{}]: {}\n",
            i + 1,
            turn.query,
            i + 1,
            turn.response
        ));
    }

    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockClassifier;
    use crate::models::Provenance;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn dictionary() -> Arc<EntityDictionary> {
        Arc::new(EntityDictionary::from_tables(
            vec![
                ("Foo Corp".to_string(), "FOO.XX".to_string()),
                ("Bar Inc".to_string(), "BAR.XX".to_string()),
                ("Kweichow Moutai".to_string(), "600519.SS".to_string()),
            ],
            vec![("Shanghai Composite".to_string(), "000001.SS".to_string())],
        ))
    }

    fn analyzer() -> IntentAnalyzer {
        IntentAnalyzer::new(Arc::new(RouterConfig::default()), dictionary())
    }

    fn binding(pronoun: &str, value: &str, target: &str, age_secs: i64) -> CoreferenceBinding {
        CoreferenceBinding {
            pronoun: pronoun.to_string(),
            kind: EntityKind::Stock,
            target: target.to_string(),
            value: value.to_string(),
            timestamp: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_price_query_extracts_stock_and_intent() {
        let result = analyzer()
            .analyze("What is the price of Foo Corp?", &[], &[])
            .await;

        assert_eq!(result.primary_intent, "specific_stock");
        assert!(result.confidence > 0.3 && result.confidence <= 1.0);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].kind, EntityKind::Stock);
        assert_eq!(result.entities[0].value, "FOO.XX");
        assert_eq!(result.entities[0].display_name, "Foo Corp");
        assert_eq!(result.target_symbols, vec!["FOO.XX".to_string()]);
        assert!(result.needs_realtime_data);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_pronoun_resolved_from_stored_binding() {
        let bindings = vec![binding("it", "Foo Corp", "FOO.XX", 30)];
        let result = analyzer()
            .analyze("What is its price?", &[], &bindings)
            .await;

        assert_eq!(result.resolved_pronouns.len(), 1);
        assert_eq!(result.resolved_pronouns[0].pronoun, "it");
        assert_eq!(result.resolved_pronouns[0].value, "Foo Corp");
        assert_eq!(result.resolved_query, "What is Foo Corp's price?");
        assert_eq!(result.entities[0].value, "FOO.XX");
        assert_eq!(result.entities[0].confidence, 0.95);
        assert_eq!(result.entities[0].provenance, Provenance::CoreferenceStore);
        assert_eq!(result.primary_intent, "specific_stock");
    }

    #[tokio::test]
    async fn test_conflicting_bindings_resolved_by_recency() {
        let bindings = vec![
            binding("it", "Foo Corp", "FOO.XX", 300),
            binding("it", "Bar Inc", "BAR.XX", 10),
        ];
        let result = analyzer()
            .analyze("What is its price?", &[], &bindings)
            .await;

        assert_eq!(result.resolved_pronouns.len(), 1);
        assert_eq!(result.resolved_pronouns[0].value, "Bar Inc");
        assert_eq!(result.resolved_query, "What is Bar Inc's price?");
    }

    #[tokio::test]
    async fn test_classifier_timeout_degrades_to_local_pipeline() {
        let mut config = RouterConfig::default();
        config.classifier_deadline = Duration::from_millis(20);

        let slow = MockClassifier {
            intent: "market_news".to_string(),
            confidence: 0.9,
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let analyzer = IntentAnalyzer::new(Arc::new(config), dictionary())
            .with_classifier(Arc::new(slow));

        let result = analyzer
            .analyze("What is the price of Foo Corp?", &[], &[])
            .await;

        assert!(!result.external_classifier_used);
        assert_eq!(result.primary_intent, "specific_stock");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_classifier_failure_degrades_to_local_pipeline() {
        let failing = MockClassifier {
            fail: true,
            ..Default::default()
        };
        let analyzer = IntentAnalyzer::new(Arc::new(RouterConfig::default()), dictionary())
            .with_classifier(Arc::new(failing));

        let result = analyzer
            .analyze("What is the price of Foo Corp?", &[], &[])
            .await;

        assert!(!result.external_classifier_used);
        assert_eq!(result.primary_intent, "specific_stock");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_classifier_success_skips_local_scoring() {
        let classifier = MockClassifier {
            intent: "market_news".to_string(),
            confidence: 0.9,
            ..Default::default()
        };
        let analyzer = IntentAnalyzer::new(Arc::new(RouterConfig::default()), dictionary())
            .with_classifier(Arc::new(classifier));

        let result = analyzer.analyze("anything new out there?", &[], &[]).await;

        assert!(result.external_classifier_used);
        assert_eq!(result.primary_intent, "market_news");
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert!(result.needs_realtime_data);
    }

    #[tokio::test]
    async fn test_store_resolution_skips_classifier() {
        let classifier = MockClassifier {
            intent: "market_news".to_string(),
            confidence: 0.9,
            ..Default::default()
        };
        let analyzer = IntentAnalyzer::new(Arc::new(RouterConfig::default()), dictionary())
            .with_classifier(Arc::new(classifier));

        let bindings = vec![binding("it", "Foo Corp", "FOO.XX", 30)];
        let result = analyzer
            .analyze("What is its price?", &[], &bindings)
            .await;

        assert!(!result.external_classifier_used);
        assert_eq!(result.resolved_pronouns.len(), 1);
    }

    #[tokio::test]
    async fn test_history_scan_fallback_for_unresolvable_pronoun() {
        let history = vec![
            ConversationTurn::new("tell me about Foo Corp", "Foo Corp looks steady"),
        ];
        let result = analyzer().analyze("is it still rising?", &history, &[]).await;

        assert!(result.resolved_pronouns.is_empty());
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].value, "FOO.XX");
        assert_eq!(result.entities[0].provenance, Provenance::HistoryScan);
        // Coarse resolution: no per-pronoun substitution
        assert_eq!(result.resolved_query, "is it still rising?");
    }

    #[tokio::test]
    async fn test_entities_deduplicated_across_sources() {
        let bindings = vec![binding("it", "Foo Corp", "FOO.XX", 30)];
        let result = analyzer()
            .analyze("should I buy more Foo Corp or dump it?", &[], &bindings)
            .await;

        let foo_count = result
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Stock && e.value == "FOO.XX")
            .count();
        assert_eq!(foo_count, 1);
    }

    #[tokio::test]
    async fn test_low_signal_query_falls_back_to_general() {
        let result = analyzer().analyze("good morning!", &[], &[]).await;
        assert_eq!(result.primary_intent, GENERAL_INTENT);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.resolved_query, "good morning!");
    }

    #[tokio::test]
    async fn test_confidence_bounds_hold_across_queries() {
        let analyzer = analyzer();
        let queries = [
            "What is the price of Foo Corp?",
            "latest market news please",
            "600519 daily candlestick chart",
            "how should I allocate my portfolio",
            "gdp growth this quarter",
            "what time is it now",
            "",
        ];
        for query in queries {
            let result = analyzer.analyze(query, &[], &[]).await;
            assert!(
                (0.0..=1.0).contains(&result.confidence),
                "confidence out of bounds for {:?}",
                query
            );
        }
    }

    #[tokio::test]
    async fn test_index_mention_targets_indices() {
        let result = analyzer()
            .analyze("how is the Shanghai Composite doing today?", &[], &[])
            .await;

        assert_eq!(result.primary_intent, "stock_market");
        assert_eq!(result.target_indices, vec!["000001.SS".to_string()]);
    }

    #[tokio::test]
    async fn test_market_query_fills_default_indices() {
        let result = analyzer().analyze("how are the markets today?", &[], &[]).await;

        assert_eq!(result.primary_intent, "stock_market");
        // No index extracted, so the category defaults fill in
        assert_eq!(result.target_indices.len(), 3);
    }

    #[tokio::test]
    async fn test_dictionary_swap_is_whole_object() {
        let analyzer = analyzer();
        assert!(analyzer.dictionary().lookup_stock("Foo Corp").is_some());

        let replacement = Arc::new(EntityDictionary::from_tables(
            vec![("Qux PLC".to_string(), "QUX.XX".to_string())],
            Vec::new(),
        ));
        analyzer.swap_dictionary(replacement);

        assert!(analyzer.dictionary().lookup_stock("Foo Corp").is_none());
        let result = analyzer.analyze("price of Qux PLC today", &[], &[]).await;
        assert_eq!(result.entities[0].value, "QUX.XX");
    }

    #[tokio::test]
    async fn test_write_back_for_new_entities() {
        let analyzer = analyzer();
        let result = analyzer
            .analyze("What is the price of Foo Corp?", &[], &[])
            .await;

        let bindings = analyzer.bindings_to_persist(&result);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].pronoun, "it");
        assert_eq!(bindings[0].target, "FOO.XX");
    }
}
