//! Per-user session layer
//!
//! Owns the bounded conversation-turn history and the coreference binding
//! store the analyzer consumes. Sessions are created lazily on first
//! interaction, refreshed on every read/write, and expire after
//! inactivity.

pub mod postgres;
pub mod store;

pub use postgres::PostgresCoreferenceStore;
pub use store::{CoreferenceStore, InMemoryCoreferenceStore, DEFAULT_BINDING_TTL};

use crate::models::{ConversationTurn, CoreferenceBinding};
use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

struct SessionEntry {
    turns: VecDeque<ConversationTurn>,
    expires_at: Instant,
}

/// Turn history plus binding store for every active user
pub struct SessionManager {
    store: Arc<dyn CoreferenceStore>,
    histories: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    max_history_rounds: usize,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CoreferenceStore>, max_history_rounds: usize) -> Self {
        Self::with_ttl(store, max_history_rounds, DEFAULT_BINDING_TTL)
    }

    pub fn with_ttl(
        store: Arc<dyn CoreferenceStore>,
        max_history_rounds: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            histories: Arc::new(RwLock::new(HashMap::new())),
            max_history_rounds,
            ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn CoreferenceStore> {
        &self.store
    }

    /// Append a completed turn, trimming to the configured bound
    pub async fn record_turn(&self, user_id: Uuid, turn: ConversationTurn) {
        let mut histories = self.histories.write().await;
        let now = Instant::now();

        let entry = histories.entry(user_id).or_insert_with(|| SessionEntry {
            turns: VecDeque::new(),
            expires_at: now + self.ttl,
        });
        if entry.expires_at <= now {
            entry.turns.clear();
        }

        entry.turns.push_back(turn);
        while entry.turns.len() > self.max_history_rounds {
            entry.turns.pop_front();
        }
        entry.expires_at = now + self.ttl;
    }

    /// The user's turns, oldest first
    pub async fn history(&self, user_id: Uuid) -> Vec<ConversationTurn> {
        let mut histories = self.histories.write().await;
        let now = Instant::now();

        match histories.get_mut(&user_id) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + self.ttl;
                entry.turns.iter().cloned().collect()
            }
            Some(_) => {
                histories.remove(&user_id);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Stored bindings for the user. A failing store degrades to "no
    /// stored bindings" so the analyzer can continue down its fallback
    /// chain.
    pub async fn bindings(&self, user_id: Uuid) -> Vec<CoreferenceBinding> {
        match self.store.get_all(user_id).await {
            Ok(bindings) => bindings,
            Err(e) => {
                warn!("Coreference store read failed, continuing without bindings: {}", e);
                Vec::new()
            }
        }
    }

    /// Persist write-back bindings; failures are logged, never surfaced
    pub async fn persist_bindings(&self, user_id: Uuid, bindings: Vec<CoreferenceBinding>) {
        for binding in bindings {
            if let Err(e) = self.store.add(user_id, binding).await {
                warn!("Coreference store write failed: {}", e);
                return;
            }
        }
    }

    /// Drop the user's turns and bindings
    pub async fn clear(&self, user_id: Uuid) {
        {
            let mut histories = self.histories.write().await;
            histories.remove(&user_id);
        }
        if let Err(e) = self.store.clear(user_id).await {
            warn!("Coreference store clear failed: {}", e);
        }
    }
}

/// Pick the binding store backend from the environment: Postgres when a
/// database URL is configured and reachable, in-memory otherwise.
pub fn build_store() -> Arc<dyn CoreferenceStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&url)
        {
            Ok(pool) => {
                info!("Coreference store backend: postgres");
                return Arc::new(PostgresCoreferenceStore::new(pool));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres coreference store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Coreference store backend: in-memory");
    Arc::new(InMemoryCoreferenceStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(InMemoryCoreferenceStore::new()), 5)
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let sessions = manager();
        let user = Uuid::new_v4();

        for i in 0..9 {
            sessions
                .record_turn(user, ConversationTurn::new(format!("q{}", i), "a"))
                .await;
        }

        let history = sessions.history(user).await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].query, "q4");
        assert_eq!(history[4].query, "q8");
    }

    #[tokio::test]
    async fn test_history_expires_after_inactivity() {
        let sessions = SessionManager::with_ttl(
            Arc::new(InMemoryCoreferenceStore::new()),
            5,
            Duration::from_millis(10),
        );
        let user = Uuid::new_v4();

        sessions
            .record_turn(user, ConversationTurn::new("hello", "hi"))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(sessions.history(user).await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_empty_bindings() {
        let sessions = SessionManager::new(Arc::new(store::UnavailableStore), 5);
        let user = Uuid::new_v4();

        assert!(sessions.bindings(user).await.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_bindings_round_trip() {
        use crate::models::EntityKind;
        use chrono::Utc;

        let sessions = manager();
        let user = Uuid::new_v4();

        sessions
            .persist_bindings(
                user,
                vec![CoreferenceBinding {
                    pronoun: "it".to_string(),
                    kind: EntityKind::Stock,
                    target: "FOO.XX".to_string(),
                    value: "Foo Corp".to_string(),
                    timestamp: Utc::now(),
                }],
            )
            .await;

        let bindings = sessions.bindings(user).await;
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].value, "Foo Corp");
    }
}
