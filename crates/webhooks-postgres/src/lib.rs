//! Postgres-backed `WebhookStore` (spec §6 persistence boundary),
//! grounded on the teacher's own sqlx usage in its job store: runtime
//! `sqlx::query`/`query_as` with bound parameters, a pool handed in by
//! the host rather than opened here, and `sqlx::migrate!` embedding
//! this crate's own `migrations/` directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use webhooks_core::boundary::{AttemptOutcome, SubscriptionSnapshot, WebhookStore};
use webhooks_core::delivery_attempt::{AttemptStatus, Request, Response};
use webhooks_core::error::WebhookError;
use webhooks_core::ids::{AttemptId, SubscriptionId};

/// Embeds this crate's `migrations/` directory so a host only needs
/// `PostgresWebhookStore::run_migrations(&pool)` at startup, the same
/// way the teacher's `main.rs` calls `sqlx::migrate!("./migrations")`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct PostgresWebhookStore {
    pool: PgPool,
}

impl PostgresWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(pool).await
    }
}

fn status_to_text(status: AttemptStatus) -> &'static str {
    match status {
        AttemptStatus::Pending => "pending",
        AttemptStatus::Successful => "successful",
        AttemptStatus::Failed => "failed",
    }
}

fn map_sqlx_err(e: sqlx::Error) -> WebhookError {
    if let sqlx::Error::Database(db_err) = &e {
        // unique_violation / serialization_failure on the row the
        // engine's write-back retry loop is racing against.
        if matches!(db_err.code().as_deref(), Some("23505") | Some("40001")) {
            return WebhookError::StoreConflict;
        }
    }
    WebhookError::Store(e.to_string())
}

#[async_trait]
impl WebhookStore for PostgresWebhookStore {
    async fn upsert_subscription(&self, snapshot: SubscriptionSnapshot) -> Result<(), WebhookError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions
                (id, for_tag, when_kind, to_url, owner_id, permission_id, dialect_id,
                 active, status_message, attempt_limit, applicable_precondition_failure_limit,
                 created_time, modified_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                for_tag = EXCLUDED.for_tag,
                when_kind = EXCLUDED.when_kind,
                to_url = EXCLUDED.to_url,
                owner_id = EXCLUDED.owner_id,
                permission_id = EXCLUDED.permission_id,
                dialect_id = EXCLUDED.dialect_id,
                active = EXCLUDED.active,
                status_message = EXCLUDED.status_message,
                attempt_limit = EXCLUDED.attempt_limit,
                applicable_precondition_failure_limit = EXCLUDED.applicable_precondition_failure_limit,
                modified_time = EXCLUDED.modified_time
            "#,
        )
        .bind(snapshot.id.0)
        .bind(&snapshot.for_)
        .bind(&snapshot.when)
        .bind(&snapshot.to)
        .bind(&snapshot.owner_id)
        .bind(&snapshot.permission_id)
        .bind(&snapshot.dialect_id)
        .bind(snapshot.active)
        .bind(&snapshot.status_message)
        .bind(snapshot.attempt_limit as i32)
        .bind(snapshot.applicable_precondition_failure_limit as i32)
        .bind(snapshot.created_time)
        .bind(snapshot.modified_time)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn record_attempt_created(
        &self,
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
        request: &Request,
        created_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let request_json = serde_json::to_value(request).map_err(|e| WebhookError::Store(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO webhook_attempts (subscription_id, attempt_id, request, created_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subscription_id, attempt_id) DO NOTHING
            "#,
        )
        .bind(subscription_id.0)
        .bind(attempt_id.0)
        .bind(request_json)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn resolve_attempt(
        &self,
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<(), WebhookError> {
        let request_json = serde_json::to_value(&outcome.request).map_err(|e| WebhookError::Store(e.to_string()))?;
        let response_json = outcome
            .response
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| WebhookError::Store(e.to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET request = $3, status = $4, message = $5, response = $6, exception = $7, resolved_time = $8
            WHERE subscription_id = $1 AND attempt_id = $2 AND resolved_time IS NULL
            "#,
        )
        .bind(subscription_id.0)
        .bind(attempt_id.0)
        .bind(request_json)
        .bind(status_to_text(outcome.status))
        .bind(&outcome.message)
        .bind(response_json)
        .bind(&outcome.exception)
        .bind(outcome.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            // Either the row doesn't exist yet (write-back raced ahead
            // of record_attempt_created) or it was already resolved by
            // a concurrent retry; either way the caller's bounded
            // retry loop is the right place to sort that out.
            return Err(WebhookError::StoreConflict);
        }
        Ok(())
    }

    async fn prune_attempts(
        &self,
        subscription_id: SubscriptionId,
        keep_attempt_ids: &[AttemptId],
    ) -> Result<(), WebhookError> {
        let keep: Vec<uuid::Uuid> = keep_attempt_ids.iter().map(|id| id.0).collect();
        sqlx::query(
            r#"
            DELETE FROM webhook_attempts
            WHERE subscription_id = $1 AND NOT (attempt_id = ANY($2))
            "#,
        )
        .bind(subscription_id.0)
        .bind(&keep)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn deactivate_subscription(&self, subscription_id: SubscriptionId, status_message: &str) -> Result<(), WebhookError> {
        sqlx::query(
            r#"UPDATE webhook_subscriptions SET active = FALSE, status_message = $2, modified_time = NOW() WHERE id = $1"#,
        )
        .bind(subscription_id.0)
        .bind(status_message)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn activate_subscription(&self, subscription_id: SubscriptionId) -> Result<(), WebhookError> {
        sqlx::query(
            r#"UPDATE webhook_subscriptions SET active = TRUE, modified_time = NOW() WHERE id = $1"#,
        )
        .bind(subscription_id.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn load_generation(&self) -> Result<Option<(u64, Vec<String>)>, WebhookError> {
        let row = sqlx::query(r#"SELECT generation, declared_keys FROM webhook_schema_generation WHERE singleton"#)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        let Some(row) = row else { return Ok(None) };
        let generation: i64 = row.try_get("generation").map_err(map_sqlx_err)?;
        let declared_keys_json: serde_json::Value = row.try_get("declared_keys").map_err(map_sqlx_err)?;
        let declared_keys: Vec<String> =
            serde_json::from_value(declared_keys_json).map_err(|e| WebhookError::Store(e.to_string()))?;
        Ok(Some((generation as u64, declared_keys)))
    }

    async fn save_generation(&self, generation: u64, declared_keys: &[String]) -> Result<(), WebhookError> {
        let declared_keys_json = serde_json::to_value(declared_keys).map_err(|e| WebhookError::Store(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO webhook_schema_generation (singleton, generation, declared_keys)
            VALUES (TRUE, $1, $2)
            ON CONFLICT (singleton) DO UPDATE SET generation = EXCLUDED.generation, declared_keys = EXCLUDED.declared_keys
            "#,
        )
        .bind(generation as i64)
        .bind(declared_keys_json)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}
