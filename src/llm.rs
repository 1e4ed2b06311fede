//! External classifier adapter
//!
//! Best-effort delegate to an OpenAI-compatible chat-completions endpoint
//! for intent classification and entity extraction. Every call is bounded
//! by the caller's deadline and fully fallback-able: any failure here just
//! routes the query back to the local scoring pipeline.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::dictionary::normalize_stock_code;
use crate::error::RouterError;
use crate::models::{Entity, EntityKind, Provenance};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Confidence assigned to classifier-supplied entities
const CLASSIFIER_ENTITY_CONFIDENCE: f32 = 0.85;

/// Outside classifier/entity-extractor, callable with a deadline
#[async_trait]
pub trait ExternalClassifier: Send + Sync {
    /// Classify the query into `(intent, confidence)`
    async fn classify(&self, query: &str, history: &str) -> crate::Result<(String, f32)>;

    /// Extract domain entities from the query and formatted history
    async fn extract_entities(&self, query: &str, history: &str) -> crate::Result<Vec<Entity>>;
}

/// Reusable chat-completions classifier (connection-pooled)
pub struct ChatClassifier {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClassifier {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(RouterError::ExternalClassifier(
                "classifier API key not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: 0.1,
        };

        info!("Calling external classifier");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Classifier request failed: {}", e);
                RouterError::ExternalClassifier(format!("request error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Classifier error response: {}", error_text);
            return Err(RouterError::ExternalClassifier(format!(
                "error response: {}",
                error_text
            )));
        }

        let completion: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse classifier response: {}", e);
            RouterError::ExternalClassifier(format!("parse error: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                RouterError::ExternalClassifier("empty classifier response".to_string())
            })
    }
}

#[async_trait]
impl ExternalClassifier for ChatClassifier {
    async fn classify(&self, query: &str, history: &str) -> crate::Result<(String, f32)> {
        let user_prompt = format!(
            "Conversation so far (may be empty):\n{}\n\nCurrent user query: {}",
            history, query
        );
        let content = self.chat(INTENT_SYSTEM_PROMPT, &user_prompt).await?;

        let parsed: IntentReply = serde_json::from_str(extract_json(&content)).map_err(|e| {
            RouterError::ExternalClassifier(format!("malformed intent reply: {}", e))
        })?;

        Ok((parsed.intent, parsed.confidence.clamp(0.0, 1.0)))
    }

    async fn extract_entities(&self, query: &str, history: &str) -> crate::Result<Vec<Entity>> {
        let user_prompt = format!(
            "Conversation so far (may be empty):\n{}\n\nCurrent user query: {}",
            history, query
        );
        let content = self.chat(ENTITY_SYSTEM_PROMPT, &user_prompt).await?;

        let parsed: EntityReply = serde_json::from_str(extract_json(&content)).map_err(|e| {
            RouterError::ExternalClassifier(format!("malformed entity reply: {}", e))
        })?;

        Ok(parsed
            .entities
            .into_iter()
            .filter_map(|raw| raw.into_entity())
            .collect())
    }
}

const INTENT_SYSTEM_PROMPT: &str = r#"You are an intent classification expert for a financial assistant.

Available intents:
- market_news: financial news queries
- stock_market: broad market / index queries
- specific_stock: queries about one or more specific stocks
- stock_historical_data: historical prices, candlestick or chart queries
- economic_analysis: macroeconomic data queries
- investment_advice: buy/sell/allocation advice queries
- time_query: date or time questions
- general: anything else

Rules:
1. If the query contains a pronoun (it, this, that, they, ...), resolve it
   against the conversation history before classifying.
2. Consider financial entities mentioned in earlier turns.

Reply with JSON only: {"intent": "<intent>", "confidence": <0..1>}"#;

const ENTITY_SYSTEM_PROMPT: &str = r#"You are an entity extraction expert for a financial assistant.

Entity types:
- stock: a stock name
- stock_code: a numeric stock code
- index: a market index name
- economic_indicator: a macroeconomic indicator
- company: a company that is not directly a listed stock

Rules:
1. If the query contains a pronoun (it, this, that, they, ...), emit the
   entity it refers to from the conversation history.
2. Emit each entity once.

Reply with JSON only: {"entities": [{"type": "<type>", "value": "<value>"}]}"#;

/// Pull the JSON object out of a possibly fenced / chatty reply
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct EntityReply {
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

impl RawEntity {
    /// Map the classifier's loose type strings onto the result taxonomy;
    /// unknown types are dropped.
    fn into_entity(self) -> Option<Entity> {
        let value = self.value.trim();
        if value.is_empty() {
            return None;
        }

        let (kind, canonical) = match self.kind.as_str() {
            "stock" | "stock_name" => (EntityKind::Stock, value.to_string()),
            "stock_code" => (EntityKind::StockCode, normalize_stock_code(value)),
            "index" | "index_name" => (EntityKind::Index, value.to_string()),
            "economic_indicator" => (EntityKind::Economic, value.to_string()),
            "company" => (EntityKind::Company, value.to_string()),
            _ => return None,
        };

        Some(Entity::new(
            kind,
            canonical,
            value,
            CLASSIFIER_ENTITY_CONFIDENCE,
            Provenance::ExternalClassifier,
        ))
    }
}

/// Mock classifier for development & testing
/// Keeps the pipeline functional without an LLM dependency
#[derive(Default)]
pub struct MockClassifier {
    pub intent: String,
    pub confidence: f32,
    pub entities: Vec<Entity>,
    /// Simulated latency before replying
    pub delay: Option<Duration>,
    /// Fail every call instead of replying
    pub fail: bool,
}

#[async_trait]
impl ExternalClassifier for MockClassifier {
    async fn classify(&self, _query: &str, _history: &str) -> crate::Result<(String, f32)> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(RouterError::ExternalClassifier("mock failure".to_string()));
        }
        Ok((self.intent.clone(), self.confidence))
    }

    async fn extract_entities(&self, _query: &str, _history: &str) -> crate::Result<Vec<Entity>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(RouterError::ExternalClassifier("mock failure".to_string()));
        }
        Ok(self.entities.clone())
    }
}
