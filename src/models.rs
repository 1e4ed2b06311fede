//! Core data models for the query router

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

//
// ================= Entities =================
//

/// Kind of domain entity a query can reference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Stock,
    Index,
    StockCode,
    Economic,
    Company,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Stock => "stock",
            EntityKind::Index => "index",
            EntityKind::StockCode => "stock_code",
            EntityKind::Economic => "economic",
            EntityKind::Company => "company",
        };
        write!(f, "{}", s)
    }
}

/// Where an entity came from, for observability and write-back decisions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Dictionary,
    NumericHeuristic,
    CoreferenceStore,
    HistoryScan,
    ExternalClassifier,
}

/// A recognized domain object (stock, index, economic indicator, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Canonical value, e.g. a full symbol like `600519.SS`
    pub value: String,
    /// Name as it appears in queries or the dictionary
    pub display_name: String,
    pub confidence: f32,
    pub provenance: Provenance,
    /// Pronoun this entity was resolved from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pronoun: Option<String>,
}

impl Entity {
    pub fn new(
        kind: EntityKind,
        value: impl Into<String>,
        display_name: impl Into<String>,
        confidence: f32,
        provenance: Provenance,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            display_name: display_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            provenance,
            pronoun: None,
        }
    }
}

/// Drop entities that repeat an already-seen `(kind, value)` pair,
/// keeping the first occurrence.
pub fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert((e.kind, e.value.clone())))
        .collect()
}

//
// ================= Coreference =================
//

/// A pronoun resolved to a concrete entity for the current query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPronoun {
    /// Base pronoun form, e.g. `it` for a detected `its`
    pub pronoun: String,
    /// Display name of the referent, e.g. `Kweichow Moutai`
    pub value: String,
    /// Canonical code of the referent, e.g. `600519.SS`
    pub target: String,
    pub kind: EntityKind,
    pub confidence: f32,
}

/// A stored association between a pronoun and the entity it referred to
/// in a prior turn. Append-only per user; conflicts are resolved at read
/// time by recency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreferenceBinding {
    pub pronoun: String,
    pub kind: EntityKind,
    /// Canonical code of the referent
    pub target: String,
    /// Display name of the referent
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

//
// ================= Conversation =================
//

/// Entities downstream layers attached to a completed turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// One completed query/response round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.metadata = Some(TurnMetadata { entities });
        self
    }
}

//
// ================= Analysis Result =================
//

/// Fallback intent when no category clears the score threshold
pub const GENERAL_INTENT: &str = "general";

/// The merged output of one `analyze()` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysisResult {
    pub primary_intent: String,
    pub confidence: f32,
    pub entities: Vec<Entity>,
    pub resolved_pronouns: Vec<ResolvedPronoun>,
    pub needs_realtime_data: bool,
    pub needs_knowledge_base: bool,
    pub needs_historical_context: bool,
    pub is_simple_time_query: bool,
    pub target_symbols: Vec<String>,
    pub target_indices: Vec<String>,
    pub economic_indicators: Vec<String>,
    pub keywords: Vec<String>,
    /// The query with resolved pronouns substituted in
    pub resolved_query: String,
    pub external_classifier_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntentAnalysisResult {
    /// Baseline result before any signal has been applied
    pub fn general(query: &str) -> Self {
        Self {
            primary_intent: GENERAL_INTENT.to_string(),
            confidence: 0.0,
            entities: Vec::new(),
            resolved_pronouns: Vec::new(),
            needs_realtime_data: false,
            needs_knowledge_base: true,
            needs_historical_context: false,
            is_simple_time_query: false,
            target_symbols: Vec::new(),
            target_indices: Vec::new(),
            economic_indicators: Vec::new(),
            keywords: Vec::new(),
            resolved_query: query.to_string(),
            external_classifier_used: false,
            error: None,
        }
    }

    /// Total-failure degradation: unclassified result carrying the
    /// original query and the internal error message.
    pub fn degraded(query: &str, error: impl Into<String>) -> Self {
        let mut result = Self::general(query);
        result.error = Some(error.into());
        result
    }
}
