mod auth;
mod config;
mod domain;
#[cfg(feature = "legacy-outbox")]
mod legacy_outbox;
mod routes_events;
mod routes_subscriptions;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::info;

use webhooks_core::{DefaultDestinationValidator, DeliveryEngine, DestinationValidator, DialectRegistry, HmacSigningDialect, Outbox, Registry, SchemaManager, SubscriptionManager};
use webhooks_postgres::PostgresWebhookStore;

use crate::config::AppConfig;
use crate::domain::StagedJsonExternalizer;
use crate::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let pg_pool = PgPool::connect(&cfg.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    PostgresWebhookStore::run_migrations(&pg_pool)
        .await
        .context("Failed to run webhooks-postgres migrations")?;

    startup_checks(&pg_pool).await?;

    let store: Arc<dyn webhooks_core::boundary::WebhookStore> =
        Arc::new(PostgresWebhookStore::new(pg_pool.clone()));

    let manager = SubscriptionManager::new();
    let registry = Registry::new(manager);

    let mut dialects = DialectRegistry::new();
    if let Some(secret) = &cfg.hmac_secret {
        dialects.register(Arc::new(HmacSigningDialect::new("hmac", secret.clone())));
        info!("hmac dialect registered");
    }
    let dialects = Arc::new(dialects);

    let externalizer = Arc::new(StagedJsonExternalizer::new());
    let validator: Arc<dyn DestinationValidator> = Arc::new(DefaultDestinationValidator::new());
    let outbox = Outbox::new(dialects.clone(), externalizer.clone(), validator.clone(), Some(store.clone()));
    let engine = DeliveryEngine::with_concurrency(registry.clone(), Some(store.clone()), cfg.max_concurrent_deliveries);

    let schema_manager = SchemaManager::new(registry.clone(), Some(store.clone()));
    schema_manager
        .restore()
        .await
        .context("Failed to restore schema manager generation")?;

    #[cfg(feature = "legacy-outbox")]
    if let (Some(url), Some(secret)) = (cfg.legacy_outbox_url.clone(), cfg.legacy_outbox_secret.clone()) {
        tokio::spawn(crate::legacy_outbox::run(pg_pool.clone(), url, secret));
    }

    let app_state: SharedState = Arc::new(AppState {
        pg_pool: pg_pool.clone(),
        registry,
        outbox,
        engine,
        schema_manager,
        externalizer,
        store,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/subscriptions", post(crate::routes_subscriptions::create_subscription))
        .route(
            "/subscriptions/:id",
            get(crate::routes_subscriptions::get_subscription),
        )
        .route(
            "/subscriptions/:id/deactivate",
            post(crate::routes_subscriptions::deactivate_subscription),
        )
        .route("/events", post(crate::routes_events::publish_event))
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let addr = &cfg.bind_addr;
    info!(%addr, "webhook-dispatcher listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    app_state.engine.wait_for_pending_deliveries().await;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn startup_checks(pg_pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pg_pool)
        .await
        .context("Postgres ping failed")?;
    info!("postgres: ok");
    Ok(())
}
