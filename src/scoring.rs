//! Keyword scoring, pattern matching, and score combination

use crate::config::RouterConfig;
use crate::models::GENERAL_INTENT;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Base score for any matching pattern
const PATTERN_BASE_SCORE: f32 = 0.7;
/// Bonus for long (complex) patterns
const COMPLEX_PATTERN_BONUS: f32 = 0.2;
/// Bonus for open `.*` (general) patterns
const GENERAL_PATTERN_BONUS: f32 = 0.1;
/// Pattern length beyond which the complexity bonus applies
const COMPLEX_PATTERN_LEN: usize = 20;

struct CompiledCategory {
    name: String,
    priority: f32,
    patterns: Vec<Regex>,
}

/// Per-category regexes, compiled once per analyzer construction.
/// A malformed pattern is logged and dropped without taking the rest of
/// its category down.
pub struct PatternMatcher {
    categories: Vec<CompiledCategory>,
}

impl PatternMatcher {
    pub fn new(config: &RouterConfig) -> Self {
        let mut categories = Vec::with_capacity(config.categories.len());

        for category in &config.categories {
            let mut patterns = Vec::with_capacity(category.patterns.len());
            for source in &category.patterns {
                match RegexBuilder::new(source).case_insensitive(true).build() {
                    Ok(regex) => patterns.push(regex),
                    Err(e) => {
                        warn!(
                            "Skipping malformed pattern {:?} in category {}: {}",
                            source, category.name, e
                        );
                    }
                }
            }
            categories.push(CompiledCategory {
                name: category.name.clone(),
                priority: category.priority,
                patterns,
            });
        }

        Self { categories }
    }

    /// Best matching pattern score per intent, weighted by priority
    pub fn pattern_scores(&self, query: &str) -> HashMap<String, f32> {
        let mut scores = HashMap::new();

        for category in &self.categories {
            let mut best: f32 = 0.0;
            for regex in &category.patterns {
                if !regex.is_match(query) {
                    continue;
                }
                let source = regex.as_str();
                let mut score = PATTERN_BASE_SCORE;
                if source.len() > COMPLEX_PATTERN_LEN {
                    score += COMPLEX_PATTERN_BONUS;
                } else if source.contains(".*") {
                    score += GENERAL_PATTERN_BONUS;
                }
                best = best.max(score);
            }

            if best > 0.0 {
                scores.insert(category.name.clone(), best * category.priority);
            }
        }

        scores
    }
}

/// Fraction of a category's keywords found in the query, weighted by
/// priority. Matching is substring-based on the lowercased query.
pub fn keyword_scores(config: &RouterConfig, query: &str) -> HashMap<String, f32> {
    let lowered = query.to_lowercase();
    let mut scores = HashMap::new();

    for category in &config.categories {
        if category.keywords.is_empty() {
            continue;
        }
        let matched = category
            .keywords
            .iter()
            .filter(|kw| lowered.contains(kw.as_str()))
            .count();
        if matched > 0 {
            let normalized = matched as f32 / category.keywords.len() as f32;
            scores.insert(category.name.clone(), normalized * category.priority);
        }
    }

    scores
}

/// Merge keyword and pattern signals, boosting entity-sensitive intents
/// by extracted-entity count, clamped to `[0, 1]`.
pub fn combine_scores(
    config: &RouterConfig,
    keyword: &HashMap<String, f32>,
    pattern: &HashMap<String, f32>,
    entity_count: usize,
) -> HashMap<String, f32> {
    let mut combined = HashMap::new();

    for intent in keyword.keys().chain(pattern.keys()) {
        if combined.contains_key(intent) {
            continue;
        }
        let keyword_score = keyword.get(intent).copied().unwrap_or(0.0);
        let pattern_score = pattern.get(intent).copied().unwrap_or(0.0);
        let mut score =
            keyword_score * config.keyword_weight + pattern_score * config.pattern_weight;

        let entity_sensitive = config
            .category(intent)
            .map(|c| c.entity_sensitive)
            .unwrap_or(false);
        if entity_sensitive && entity_count > 0 {
            let boost =
                (entity_count as f32 * config.entity_boost_step).min(config.entity_boost_cap);
            score += boost;
        }

        combined.insert(intent.clone(), score.clamp(0.0, 1.0));
    }

    combined
}

/// Arg-max over combined scores; `None` (→ the `general` fallback) when
/// nothing clears the configured threshold.
pub fn pick_winner(config: &RouterConfig, combined: &HashMap<String, f32>) -> Option<(String, f32)> {
    let (intent, score) = combined
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))?;

    if *score > config.score_threshold {
        debug!("Winning intent {} at {:.2}", intent, score);
        Some((intent.clone(), *score))
    } else {
        debug!(
            "Max combined score {:.2} below threshold, falling back to {}",
            score, GENERAL_INTENT
        );
        None
    }
}
