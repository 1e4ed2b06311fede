//! Error types for the financial query router

use thiserror::Error;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {

    // =============================
    // Classification Pipeline Errors
    // =============================

    #[error("Configuration load error: {0}")]
    ConfigLoad(String),

    #[error("Pattern compile error: {0}")]
    PatternCompile(String),

    #[error("External classifier error: {0}")]
    ExternalClassifier(String),

    #[error("Coreference store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
