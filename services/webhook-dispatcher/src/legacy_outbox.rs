//! Optional at-least-once delivery queue (`legacy-outbox` feature),
//! independent of the default `Subscription`/`Outbox`/`DeliveryEngine`
//! pipeline. A separate polling loop claims rows from `webhook_outbox`
//! with `FOR UPDATE SKIP LOCKED` and retries with exponential backoff
//! until `MAX_ATTEMPTS`, signing each body with HMAC-SHA256. Off by
//! default: the core's give-up-after-N-failures contract is unaffected
//! by whether this loop runs.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const LEASE_DURATION: i64 = 30;
const MAX_ATTEMPTS: i32 = 20;

type HmacSha256 = Hmac<Sha256>;

/// Enqueues an event for at-least-once delivery via the legacy queue,
/// independent of (and in addition to, if a caller wants both) the
/// default pipeline's `Outbox`.
pub async fn enqueue(pool: &PgPool, event: serde_json::Value) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO webhook_outbox (id, event) VALUES ($1, $2)")
        .bind(id)
        .bind(event)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn run(pool: PgPool, url: String, secret: String) {
    info!(%url, "legacy_outbox: dispatcher started");
    let client = reqwest::Client::new();
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "webhook-dispatcher".to_string());

    loop {
        match claim_and_send(&pool, &client, &url, &secret, &hostname).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => {
                error!("legacy_outbox: error: {e:?}");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn claim_and_send(
    pool: &PgPool,
    client: &reqwest::Client,
    url: &str,
    secret: &str,
    hostname: &str,
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT id, event, attempts
        FROM webhook_outbox
        WHERE status != 'delivered'
          AND next_attempt_at <= NOW()
          AND (locked_until IS NULL OR locked_until < NOW())
          AND attempts < $1
        ORDER BY next_attempt_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(MAX_ATTEMPTS)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else { return Ok(false) };

    let id: Uuid = row.get("id");
    let event: serde_json::Value = row.get("event");
    let attempts: i32 = row.get("attempts");

    sqlx::query(
        r#"UPDATE webhook_outbox SET locked_by = $1, locked_until = NOW() + ($2 * INTERVAL '1 second') WHERE id = $3"#,
    )
    .bind(hostname)
    .bind(LEASE_DURATION)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let body = event.to_string();
    let ts = Utc::now().timestamp();
    let signature = sign_payload(secret, ts, &body);

    let resp = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Idempotency-Key", id.to_string())
        .header("X-Timestamp", ts.to_string())
        .header("X-Signature", signature)
        .body(body)
        .send()
        .await;

    match resp {
        Ok(r) if r.status().is_success() => {
            sqlx::query(
                r#"UPDATE webhook_outbox SET status='delivered', delivered_at=NOW(), locked_by=NULL, locked_until=NULL, last_error=NULL WHERE id=$1"#,
            )
            .bind(id)
            .execute(pool)
            .await?;
            info!(%id, "legacy_outbox: delivered");
        }
        Ok(r) => {
            let err_msg = format!("HTTP {}", r.status());
            handle_failure(pool, id, attempts, &err_msg).await?;
            warn!(%id, status = %r.status(), "legacy_outbox: delivery failed");
        }
        Err(e) => {
            let err_msg = e.to_string();
            handle_failure(pool, id, attempts, &err_msg).await?;
            warn!(%id, error = %err_msg, "legacy_outbox: delivery error");
        }
    }

    Ok(true)
}

async fn handle_failure(pool: &PgPool, id: Uuid, attempts: i32, err_msg: &str) -> anyhow::Result<()> {
    let new_attempts = attempts + 1;
    let backoff_secs = 2u64.pow(new_attempts.min(12) as u32).min(3600);

    if new_attempts >= MAX_ATTEMPTS {
        sqlx::query(
            r#"UPDATE webhook_outbox SET status='failed', attempts=$1, locked_by=NULL, locked_until=NULL, last_error=$2 WHERE id=$3"#,
        )
        .bind(new_attempts)
        .bind(err_msg)
        .bind(id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            r#"UPDATE webhook_outbox SET status='retrying', attempts=$1, next_attempt_at=NOW() + ($2 * INTERVAL '1 second'), locked_by=NULL, locked_until=NULL, last_error=$3 WHERE id=$4"#,
        )
        .bind(new_attempts)
        .bind(backoff_secs as i64)
        .bind(err_msg)
        .bind(id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

fn sign_payload(secret: &str, ts: i64, body: &str) -> String {
    let payload = format!("{ts}.{body}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
