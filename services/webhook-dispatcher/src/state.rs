use std::sync::Arc;

use sqlx::PgPool;
use webhooks_core::boundary::WebhookStore;
use webhooks_core::{DeliveryEngine, Outbox, Registry, SchemaManager};

use crate::domain::StagedJsonExternalizer;

pub type SharedState = Arc<AppState>;

/// Everything a route handler needs, assembled once at startup — the
/// same "one `Arc<AppState>` cloned into every handler" shape as the
/// teacher's own `AppState` (spec §6 host wiring).
pub struct AppState {
    pub pg_pool: PgPool,
    pub registry: Arc<Registry>,
    pub outbox: Outbox,
    pub engine: DeliveryEngine,
    pub schema_manager: SchemaManager,
    pub externalizer: Arc<StagedJsonExternalizer>,
    pub store: Arc<dyn WebhookStore>,
}
