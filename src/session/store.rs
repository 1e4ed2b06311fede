//! Coreference binding store
//!
//! The store enforces no uniqueness: bindings are append-only per user and
//! conflicts are resolved at read time by the resolver. Entries live under
//! a sliding TTL refreshed on every read or write.

use crate::error::RouterError;
use crate::models::CoreferenceBinding;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default sliding expiration for a user's bindings
pub const DEFAULT_BINDING_TTL: Duration = Duration::from_secs(1800);

/// Trait for per-user coreference binding persistence
#[async_trait::async_trait]
pub trait CoreferenceStore: Send + Sync {
    /// Append a binding for the user
    async fn add(&self, user_id: Uuid, binding: CoreferenceBinding) -> Result<bool>;

    /// All live bindings for the user, unordered
    async fn get_all(&self, user_id: Uuid) -> Result<Vec<CoreferenceBinding>>;

    /// Drop all bindings for the user
    async fn clear(&self, user_id: Uuid) -> Result<()>;
}

struct UserBindings {
    bindings: Vec<CoreferenceBinding>,
    expires_at: Instant,
}

/// In-memory coreference store for development and tests
pub struct InMemoryCoreferenceStore {
    entries: Arc<RwLock<HashMap<Uuid, UserBindings>>>,
    ttl: Duration,
}

impl InMemoryCoreferenceStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_BINDING_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }
}

impl Default for InMemoryCoreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CoreferenceStore for InMemoryCoreferenceStore {
    async fn add(&self, user_id: Uuid, binding: CoreferenceBinding) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let entry = entries.entry(user_id).or_insert_with(|| UserBindings {
            bindings: Vec::new(),
            expires_at: now + self.ttl,
        });
        if entry.expires_at <= now {
            entry.bindings.clear();
        }

        entry.bindings.push(binding);
        entry.expires_at = now + self.ttl;
        Ok(true)
    }

    async fn get_all(&self, user_id: Uuid) -> Result<Vec<CoreferenceBinding>> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        match entries.get_mut(&user_id) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + self.ttl;
                Ok(entry.bindings.clone())
            }
            Some(_) => {
                entries.remove(&user_id);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn clear(&self, user_id: Uuid) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(&user_id);
        Ok(())
    }
}

/// A store stand-in that always fails, for exercising degradation paths
pub struct UnavailableStore;

#[async_trait::async_trait]
impl CoreferenceStore for UnavailableStore {
    async fn add(&self, _user_id: Uuid, _binding: CoreferenceBinding) -> Result<bool> {
        Err(RouterError::StoreUnavailable("store offline".to_string()))
    }

    async fn get_all(&self, _user_id: Uuid) -> Result<Vec<CoreferenceBinding>> {
        Err(RouterError::StoreUnavailable("store offline".to_string()))
    }

    async fn clear(&self, _user_id: Uuid) -> Result<()> {
        Err(RouterError::StoreUnavailable("store offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use chrono::Utc;

    fn binding(pronoun: &str, value: &str) -> CoreferenceBinding {
        CoreferenceBinding {
            pronoun: pronoun.to_string(),
            kind: EntityKind::Stock,
            target: format!("{}.XX", value.to_uppercase()),
            value: value.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_add_then_get_all() {
        let store = InMemoryCoreferenceStore::new();
        let user = Uuid::new_v4();

        assert!(store.add(user, binding("it", "foo")).await.unwrap());
        assert!(store.add(user, binding("it", "bar")).await.unwrap());

        let bindings = store.get_all(user).await.unwrap();
        assert_eq!(bindings.len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_bindings_both_kept() {
        let store = InMemoryCoreferenceStore::new();
        let user = Uuid::new_v4();

        store.add(user, binding("it", "foo")).await.unwrap();
        store.add(user, binding("it", "foo")).await.unwrap();

        // The store never deduplicates; that is the resolver's job
        assert_eq!(store.get_all(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = InMemoryCoreferenceStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.add(alice, binding("it", "foo")).await.unwrap();
        assert!(store.get_all(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let store = InMemoryCoreferenceStore::with_ttl(Duration::from_millis(10));
        let user = Uuid::new_v4();

        store.add(user, binding("it", "foo")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get_all(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_refresh_the_ttl() {
        let store = InMemoryCoreferenceStore::with_ttl(Duration::from_millis(80));
        let user = Uuid::new_v4();

        store.add(user, binding("it", "foo")).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert_eq!(store.get_all(user).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_clear_removes_bindings() {
        let store = InMemoryCoreferenceStore::new();
        let user = Uuid::new_v4();

        store.add(user, binding("it", "foo")).await.unwrap();
        store.clear(user).await.unwrap();
        assert!(store.get_all(user).await.unwrap().is_empty());
    }
}
