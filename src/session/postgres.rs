//! Postgres-backed coreference store
//!
//! Mirrors the in-memory store's contract on a `coreference_bindings`
//! table with a sliding `expires_at` column. Schema is created lazily on
//! first use.

use crate::error::RouterError;
use crate::models::{CoreferenceBinding, EntityKind};
use crate::session::store::{CoreferenceStore, DEFAULT_BINDING_TTL};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PostgresCoreferenceStore {
    pool: PgPool,
    ttl: Duration,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresCoreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_ttl(pool, DEFAULT_BINDING_TTL)
    }

    pub fn with_ttl(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS coreference_bindings (
                      binding_id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      pronoun TEXT NOT NULL,
                      kind TEXT NOT NULL,
                      target TEXT NOT NULL,
                      value TEXT NOT NULL,
                      bound_at TIMESTAMPTZ NOT NULL,
                      expires_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_coreference_bindings_user_time
                    ON coreference_bindings (user_id, bound_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                RouterError::Database(format!(
                    "Failed to initialize coreference store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn ttl_seconds(&self) -> f64 {
        self.ttl.as_secs_f64()
    }

    fn kind_to_db(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Stock => "stock",
            EntityKind::Index => "index",
            EntityKind::StockCode => "stock_code",
            EntityKind::Economic => "economic",
            EntityKind::Company => "company",
        }
    }

    fn kind_from_db(kind: &str) -> EntityKind {
        match kind {
            "index" => EntityKind::Index,
            "stock_code" => EntityKind::StockCode,
            "economic" => EntityKind::Economic,
            "company" => EntityKind::Company,
            _ => EntityKind::Stock,
        }
    }
}

#[async_trait::async_trait]
impl CoreferenceStore for PostgresCoreferenceStore {
    async fn add(&self, user_id: Uuid, binding: CoreferenceBinding) -> Result<bool> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO coreference_bindings
              (binding_id, user_id, pronoun, kind, target, value, bound_at, expires_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, NOW() + make_interval(secs => $8))
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&binding.pronoun)
        .bind(Self::kind_to_db(binding.kind))
        .bind(&binding.target)
        .bind(&binding.value)
        .bind(binding.timestamp)
        .bind(self.ttl_seconds())
        .execute(&self.pool)
        .await
        .map_err(|e| RouterError::Database(format!("Failed to insert binding: {}", e)))?;

        // Writes also refresh the user's other live bindings
        sqlx::query(
            r#"
            UPDATE coreference_bindings
            SET expires_at = NOW() + make_interval(secs => $2)
            WHERE user_id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(self.ttl_seconds())
        .execute(&self.pool)
        .await
        .map_err(|e| RouterError::Database(format!("Failed to refresh bindings: {}", e)))?;

        Ok(true)
    }

    async fn get_all(&self, user_id: Uuid) -> Result<Vec<CoreferenceBinding>> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            UPDATE coreference_bindings
            SET expires_at = NOW() + make_interval(secs => $2)
            WHERE user_id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(self.ttl_seconds())
        .execute(&self.pool)
        .await
        .map_err(|e| RouterError::Database(format!("Failed to refresh bindings: {}", e)))?;

        let rows = sqlx::query(
            r#"
            SELECT pronoun, kind, target, value, bound_at
            FROM coreference_bindings
            WHERE user_id = $1 AND expires_at > NOW()
            ORDER BY bound_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RouterError::Database(format!("Failed to load bindings: {}", e)))?;

        let mut bindings = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind").unwrap_or_else(|_| "stock".to_string());
            bindings.push(CoreferenceBinding {
                pronoun: row.try_get("pronoun").unwrap_or_default(),
                kind: Self::kind_from_db(&kind),
                target: row.try_get("target").unwrap_or_default(),
                value: row.try_get("value").unwrap_or_default(),
                timestamp: row
                    .try_get::<DateTime<Utc>, _>("bound_at")
                    .unwrap_or_else(|_| Utc::now()),
            });
        }

        Ok(bindings)
    }

    async fn clear(&self, user_id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM coreference_bindings WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RouterError::Database(format!("Failed to clear bindings: {}", e)))?;

        Ok(())
    }
}
