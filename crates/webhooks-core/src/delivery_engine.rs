use crate::delivery_attempt::{AttemptStatus, Request, Response, TRANSPORT_FAILURE_MESSAGE};
use crate::dialect::Dialect;
use crate::events::WebhookEvent;
use crate::registry::Registry;
use crate::shipment::{ShipmentInfo, ShipmentPair};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const DEFAULT_MAX_CONCURRENT: usize = 4;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_STORE_RETRIES: u32 = 10;

/// Drains `ShipmentInfo` parcels handed to it by the `Outbox`, each
/// pair delivered by its own task gated through a semaphore so one
/// shipment can't monopolize the worker pool (spec §4.8.1, modeled on
/// a bounded `tokio::spawn` worker pool the way the teacher's
/// `worker_loop::run_worker_loop` caps concurrency with `MAX_CONCURRENT`
/// rather than spawning unboundedly).
pub struct DeliveryEngine {
    semaphore: Arc<Semaphore>,
    registry: Arc<Registry>,
    store: Option<Arc<dyn crate::boundary::WebhookStore>>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl DeliveryEngine {
    pub fn new(registry: Arc<Registry>, store: Option<Arc<dyn crate::boundary::WebhookStore>>) -> Self {
        Self::with_concurrency(registry, store, DEFAULT_MAX_CONCURRENT)
    }

    pub fn with_concurrency(
        registry: Arc<Registry>,
        store: Option<Arc<dyn crate::boundary::WebhookStore>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            registry,
            store,
            tasks: AsyncMutex::new(JoinSet::new()),
        }
    }

    /// Spawns one delivery task per pair in the shipment (spec §4.8.1).
    /// Pairs are already sorted by destination URL (`ShipmentInfo::new`)
    /// so pairs bound for the same host tend to run close together.
    /// Each shipment builds its own `reqwest::Client`, shared by the
    /// tasks delivering that shipment's pairs but never reused across
    /// shipments (spec §5: "HTTP sessions are per-delivery-task, not
    /// shared across workers") — the keep-alive pool inside one client
    /// still benefits same-host pairs within a shipment.
    pub async fn accept_for_delivery(&self, shipment: ShipmentInfo) {
        if shipment.is_empty() {
            return;
        }
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        let mut tasks = self.tasks.lock().await;
        for pair in shipment.pairs {
            let client = client.clone();
            let semaphore = self.semaphore.clone();
            let registry = self.registry.clone();
            let store = self.store.clone();
            tasks.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return;
                };
                deliver_one(client, registry, store, pair).await;
                drop(permit);
            });
        }
    }

    /// Blocks until every delivery task accepted so far has finished,
    /// as a graceful-shutdown hook would call before the process exits
    /// (spec §4.8.1 "engine" lifecycle).
    pub async fn wait_for_pending_deliveries(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("delivery task panicked: {e}");
                }
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

async fn deliver_one(
    client: reqwest::Client,
    registry: Arc<Registry>,
    store: Option<Arc<dyn crate::boundary::WebhookStore>>,
    pair: ShipmentPair,
) {
    let prepared = pair.dialect.prepare_request(&pair);
    let sent_request = Request::new(
        prepared.url.clone(),
        prepared.method.clone(),
        String::from_utf8_lossy(&prepared.body).into_owned(),
        prepared.headers.clone(),
    );

    let method = match prepared.method.parse::<reqwest::Method>() {
        Ok(m) => m,
        Err(_) => reqwest::Method::POST,
    };
    let mut builder = client.request(method, &prepared.url).body(prepared.body.clone());
    for (name, value) in &prepared.headers {
        builder = builder.header(name, value);
    }

    let started = Instant::now();
    let outcome = builder.send().await;

    let (status, message, response) = match outcome {
        Ok(resp) => {
            let status_code = resp.status().as_u16();
            let reason = resp
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string();
            let mut headers = BTreeMap::new();
            for (name, value) in resp.headers() {
                if let Ok(v) = value.to_str() {
                    headers.insert(name.to_string(), v.to_string());
                }
            }
            let content = resp.text().await.unwrap_or_default();
            let elapsed = started.elapsed();
            let ok = (200..300).contains(&status_code);
            let message = format!("{status_code} {reason}");
            let response = Response {
                status_code,
                reason,
                headers,
                content,
                elapsed,
                created_time: chrono::Utc::now(),
            };
            let status = if ok { AttemptStatus::Successful } else { AttemptStatus::Failed };
            (status, message, Some(response))
        }
        Err(e) => {
            pair.subscription
                .record_exception_on_attempt(pair.attempt_id, e.to_string())
                .await;
            (AttemptStatus::Failed, TRANSPORT_FAILURE_MESSAGE.to_string(), None)
        }
    };

    let resolved = pair
        .subscription
        .resolve_attempt(pair.attempt_id, Some(sent_request.clone()), status, message.clone(), response.clone())
        .await;

    let Ok(resolved) = resolved else {
        warn!(
            subscription_id = %pair.subscription_id,
            attempt_id = %pair.attempt_id,
            "write-back found attempt already resolved, skipping"
        );
        return;
    };

    if let Some(store) = &store {
        let outcome = crate::boundary::AttemptOutcome {
            status,
            message,
            request: sent_request,
            response,
            exception: None,
            resolved_at: chrono::Utc::now(),
        };
        write_back_with_retry(store.as_ref(), pair.subscription_id, pair.attempt_id, outcome).await;
    }

    let event = match resolved.status {
        AttemptStatus::Successful => WebhookEvent::AttemptSucceeded {
            subscription_id: resolved.subscription_id,
            attempt_id: resolved.attempt_id,
        },
        _ => WebhookEvent::AttemptFailed {
            subscription_id: resolved.subscription_id,
            attempt_id: resolved.attempt_id,
        },
    };

    if let Some(manager) = registry.manager_by_id(pair.subscription.manager_id).await {
        manager.publish(event, &pair.subscription).await;
    } else {
        warn!(manager_id = %pair.subscription.manager_id, "owning manager not found in registry, event not published");
    }

    info!(
        subscription_id = %pair.subscription_id,
        attempt_id = %pair.attempt_id,
        status = ?status,
        "delivery attempt resolved"
    );
}

/// Retries a `WebhookStore` write-back up to `MAX_STORE_RETRIES` times
/// on `StoreConflict` (spec §4.8: durability mirror writes are
/// idempotent and may race with a concurrent recovery sweep).
async fn write_back_with_retry(
    store: &dyn crate::boundary::WebhookStore,
    subscription_id: crate::ids::SubscriptionId,
    attempt_id: crate::ids::AttemptId,
    outcome: crate::boundary::AttemptOutcome,
) {
    let mut attempt = 0;
    loop {
        match store.resolve_attempt(subscription_id, attempt_id, outcome.clone()).await {
            Ok(()) => return,
            Err(crate::error::WebhookError::StoreConflict) if attempt < MAX_STORE_RETRIES => {
                attempt += 1;
                warn!(%subscription_id, %attempt_id, attempt, "store conflict writing back attempt, retrying");
            }
            Err(e) => {
                error!(%subscription_id, %attempt_id, error = %e, "giving up on store write-back");
                return;
            }
        }
    }
}
