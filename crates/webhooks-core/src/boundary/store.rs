use crate::delivery_attempt::{AttemptStatus, Request, Response};
use crate::error::WebhookError;
use crate::ids::{AttemptId, SubscriptionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// What happened to one delivery attempt, as captured by the engine
/// after the HTTP exchange (or lack thereof) completes. Handed to
/// `WebhookStore::resolve_attempt` for durable write-back.
#[derive(Clone, Debug)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub message: String,
    pub request: Request,
    pub response: Option<Response>,
    pub exception: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Durability side-channel for subscriptions and attempts (spec §6
/// persistence boundary). The in-process `Arc<Subscription>` graph
/// remains the live source of truth the outbox and engine operate
/// against; a `WebhookStore` implementation mirrors it the way the
/// teacher's `AppState.jobs` in-memory map is mirrored by its
/// `jobs`/`job_events` Postgres tables (`state.rs`, `events.rs`).
///
/// Every method is expected to be idempotent under retry: the engine's
/// write-back loop retries `resolve_attempt` up to a bounded count on
/// `WebhookError::StoreConflict` (spec §4.8, §5).
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn upsert_subscription(&self, snapshot: SubscriptionSnapshot) -> Result<(), WebhookError>;

    async fn record_attempt_created(
        &self,
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
        request: &Request,
        created_at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;

    async fn resolve_attempt(
        &self,
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<(), WebhookError>;

    async fn prune_attempts(
        &self,
        subscription_id: SubscriptionId,
        keep_attempt_ids: &[AttemptId],
    ) -> Result<(), WebhookError>;

    async fn deactivate_subscription(
        &self,
        subscription_id: SubscriptionId,
        status_message: &str,
    ) -> Result<(), WebhookError>;

    async fn activate_subscription(&self, subscription_id: SubscriptionId) -> Result<(), WebhookError>;

    /// Last-installed declaration-set generation recorded by the
    /// `config::SchemaManager`, so a process restart resumes its diff
    /// from where it left off (spec §6, supplemented from
    /// `generations.py`'s practice of recording the installed
    /// generation against the database root). `None` means the schema
    /// manager has never run against this store.
    async fn load_generation(&self) -> Result<Option<(u64, Vec<String>)>, WebhookError>;

    async fn save_generation(&self, generation: u64, declared_keys: &[String]) -> Result<(), WebhookError>;
}

/// Durable snapshot of a subscription's configuration and lifecycle
/// flags, independent of its in-process attempt container.
#[derive(Clone, Debug)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub for_: String,
    pub when: String,
    pub to: String,
    pub owner_id: Option<String>,
    pub permission_id: Option<String>,
    pub dialect_id: Option<String>,
    pub active: bool,
    pub status_message: String,
    pub attempt_limit: u32,
    pub applicable_precondition_failure_limit: u32,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}
