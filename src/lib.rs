//! Financial Query Router
//!
//! A conversational query router for a financial assistant that:
//! - Classifies utterances into financial intents via keyword + pattern scoring
//! - Extracts stock/index/indicator entities from query text
//! - Resolves pronouns against per-user coreference bindings, most recent first
//! - Optionally delegates to an external classifier, bounded by a deadline
//! - Degrades tier by tier and never fails the caller
//!
//! FALLBACK CHAIN:
//! STORE BINDINGS → EXTERNAL CLASSIFIER → LOCAL SCORING → HISTORY SCAN → GENERAL

pub mod analyzer;
pub mod api;
pub mod config;
pub mod coreference;
pub mod dictionary;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod models;
pub mod scoring;
pub mod session;

pub use error::Result;

// Re-export common types
pub use analyzer::IntentAnalyzer;
pub use config::RouterConfig;
pub use dictionary::EntityDictionary;
pub use models::*;
