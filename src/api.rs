//! REST API server for the query router
//!
//! Exposes `analyze` plus the session write-backs over HTTP for the
//! orchestration and response-formatting layers.

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::analyzer::IntentAnalyzer;
use crate::models::{ConversationTurn, Entity};
use crate::session::SessionManager;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub query: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub user_id: Option<String>,
    pub query: String,
    pub response: String,
    /// Entities the downstream layers attached to the finished turn
    pub entities: Option<Vec<Entity>>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub analyzer: Arc<IntentAnalyzer>,
    pub sessions: Arc<SessionManager>,
}

/// =============================
/// Helpers — Opaque Id → Uuid
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analyze Endpoint
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received analyze request: {}", req.query);

    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    let history = state.sessions.history(user_id).await;
    let bindings = state.sessions.bindings(user_id).await;

    let result = state.analyzer.analyze(&req.query, &history, &bindings).await;

    // Write back resolutions (or fresh entities) so future pronouns resolve
    let to_persist = state.analyzer.bindings_to_persist(&result);
    if !to_persist.is_empty() {
        state.sessions.persist_bindings(user_id, to_persist).await;
    }

    (StatusCode::OK, Json(ApiResponse::success(result)))
}

/// =============================
/// Turn Write-back Endpoint
/// =============================

async fn record_turn(
    State(state): State<ApiState>,
    Json(req): Json<TurnRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Turn query must not be empty".into())),
        );
    }

    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");

    let mut turn = ConversationTurn::new(req.query, req.response);
    if let Some(entities) = req.entities {
        turn = turn.with_entities(entities);
    }

    state.sessions.record_turn(user_id, turn).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "user_id": user_id.to_string(),
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(analyzer: Arc<IntentAnalyzer>, sessions: Arc<SessionManager>) -> Router {
    let state = ApiState { analyzer, sessions };

    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/turn", post(record_turn))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    analyzer: Arc<IntentAnalyzer>,
    sessions: Arc<SessionManager>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(analyzer, sessions);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
