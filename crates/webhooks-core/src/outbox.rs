use crate::boundary::Externalizer;
use crate::delivery_attempt::AttemptStatus;
use crate::dialect::{Dialect, DialectRegistry};
use crate::domain_object::ObjectEvent;
use crate::error::{Result, WebhookError};
use crate::ids::{AttemptId, ObjectRef, SubscriptionId, UowId};
use crate::shipment::{ShipmentInfo, ShipmentPair};
use crate::subscription::Subscription;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

fn base_headers(dialect: &dyn Dialect) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), dialect.content_type().to_string());
    headers.insert("User-Agent".to_string(), dialect.user_agent().to_string());
    headers
}

/// One attempt this outbox created for the unit of work, with the
/// payload bytes it was sent so `tpc_vote` never has to re-derive or
/// re-look-up anything.
struct CreatedAttempt {
    subscription: Arc<Subscription>,
    attempt_id: AttemptId,
    dialect_name: Option<String>,
    payload: Arc<[u8]>,
}

/// Everything accumulated for one unit of work between the first
/// `add_subscriptions` call and its resolution (spec §4.7).
struct Transaction {
    /// `(object_ref, primary event kind, subscription)` triples already
    /// accumulated, for dedup (spec §9 resolved open question:
    /// identical triples within one unit of work collapse to one
    /// attempt; distinct event kinds on the same data/subscription do
    /// not).
    seen: HashSet<(ObjectRef, String, SubscriptionId)>,
    pending: Vec<(ObjectEvent, Arc<Subscription>)>,
    created: Vec<CreatedAttempt>,
    payload_cache: HashMap<(ObjectRef, String), Arc<[u8]>>,
    ready: Option<ShipmentInfo>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            pending: Vec::new(),
            created: Vec::new(),
            payload_cache: HashMap::new(),
            ready: None,
        }
    }
}

/// The two-phase-commit participant a host's unit-of-work machinery
/// drives (spec §4.7 `Outbox`/`TxnDataManager`). Accumulates
/// `(data, event, subscriptions)` triples during normal operation,
/// then at `tpc_begin` eagerly creates each pending `DeliveryAttempt`
/// (so a crash after `tpc_begin` leaves attempts a recovery sweep can
/// still see), hands the engine a `ShipmentInfo` at `tpc_vote`, and on
/// `tpc_finish` kicks off delivery. `tpc_abort`/`abort` roll back every
/// attempt this outbox created for the unit of work.
pub struct Outbox {
    dialects: Arc<DialectRegistry>,
    externalizer: Arc<dyn Externalizer>,
    validator: Arc<dyn crate::destination_validator::DestinationValidator>,
    store: Option<Arc<dyn crate::boundary::WebhookStore>>,
    transactions: Mutex<HashMap<UowId, Transaction>>,
}

impl Outbox {
    pub fn new(
        dialects: Arc<DialectRegistry>,
        externalizer: Arc<dyn Externalizer>,
        validator: Arc<dyn crate::destination_validator::DestinationValidator>,
        store: Option<Arc<dyn crate::boundary::WebhookStore>>,
    ) -> Self {
        Self {
            dialects,
            externalizer,
            validator,
            store,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Accumulates delivery candidates for the current unit of work
    /// (spec §4.6/§4.7: the registry hands the outbox the result of its
    /// scope walk after each object event). No I/O happens here; the
    /// attempts themselves aren't created until `tpc_begin`.
    pub fn add_subscriptions(&self, uow: UowId, event: &ObjectEvent, subscriptions: &[Arc<Subscription>]) {
        let object_ref = event.object.object_ref();
        let kind = event.kind_tags.first().map(|k| k.0.to_string()).unwrap_or_default();
        let mut txns = self.transactions.lock().unwrap();
        let txn = txns.entry(uow).or_insert_with(Transaction::new);
        for sub in subscriptions {
            let key = (object_ref.clone(), kind.clone(), sub.id);
            if txn.seen.insert(key) {
                txn.pending.push((event.clone(), sub.clone()));
            }
        }
    }

    /// Phase 1: for every distinct triple accumulated so far, serialize
    /// the payload (memoized per `(object_ref, dialect)` so N
    /// subscriptions sharing a dialect pay the externalization cost
    /// once) and create the attempt (spec §4.4.3, §4.7). Destination
    /// validation runs inline and may resolve the attempt to `Failed`
    /// before this call even returns; those attempts are excluded from
    /// `tpc_vote`'s shipment.
    pub async fn tpc_begin(&self, uow: UowId) -> Result<()> {
        let pending = {
            let mut txns = self.transactions.lock().unwrap();
            let txn = txns.get_mut(&uow).ok_or(WebhookError::UnitOfWorkNotJoined(uow))?;
            std::mem::take(&mut txn.pending)
        };

        for (event, sub) in pending {
            let dialect = self.dialects.get(sub.dialect_id.as_deref())?;
            let object_ref = event.object.object_ref();
            let cache_key = (object_ref, dialect.name().to_string());

            let cached = {
                let txns = self.transactions.lock().unwrap();
                txns.get(&uow).and_then(|t| t.payload_cache.get(&cache_key).cloned())
            };
            let payload = match cached {
                Some(p) => p,
                None => {
                    let bytes = dialect.externalize_data(&*self.externalizer, &*event.object, &event)?;
                    let arc: Arc<[u8]> = Arc::from(bytes.into_boxed_slice());
                    let mut txns = self.transactions.lock().unwrap();
                    if let Some(txn) = txns.get_mut(&uow) {
                        txn.payload_cache.insert(cache_key, arc.clone());
                    }
                    arc
                }
            };

            let attempt_id = sub
                .create_delivery_attempt(
                    &payload,
                    dialect.http_method(),
                    base_headers(&*dialect),
                    &*self.validator,
                    format!("uow:{uow}"),
                )
                .await;

            if let Some(store) = &self.store {
                if let Some(attempt) = sub.get_attempt(attempt_id).await {
                    store
                        .record_attempt_created(sub.id, attempt_id, &attempt.request, attempt.created_time)
                        .await?;
                }
            }

            let mut txns = self.transactions.lock().unwrap();
            if let Some(txn) = txns.get_mut(&uow) {
                txn.created.push(CreatedAttempt {
                    subscription: sub,
                    attempt_id,
                    dialect_name: sub_dialect_name(&dialect),
                    payload,
                });
            }
        }
        Ok(())
    }

    /// Phase 2 vote: builds the `ShipmentInfo` parcel out of every
    /// attempt this unit of work created that's still `Pending` (spec
    /// §4.7, §4.8 `createShipmentInfo`). Attempts already resolved to
    /// `Failed` by destination validation are not shipped.
    pub async fn tpc_vote(&self, uow: UowId) -> Result<ShipmentInfo> {
        let created = {
            let mut txns = self.transactions.lock().unwrap();
            let txn = txns.get_mut(&uow).ok_or(WebhookError::UnitOfWorkNotJoined(uow))?;
            std::mem::take(&mut txn.created)
        };

        let mut pairs = Vec::new();
        for entry in created {
            let Some(attempt) = entry.subscription.get_attempt(entry.attempt_id).await else {
                continue;
            };
            if attempt.status() != AttemptStatus::Pending {
                continue;
            }
            let dialect = self.dialects.get(entry.dialect_name.as_deref())?;
            pairs.push(ShipmentPair {
                subscription_id: entry.subscription.id,
                attempt_id: entry.attempt_id,
                to: entry.subscription.to.clone(),
                dialect,
                payload: entry.payload,
                subscription: entry.subscription,
            });
        }

        let info = ShipmentInfo::new(pairs);
        let mut txns = self.transactions.lock().unwrap();
        if let Some(txn) = txns.get_mut(&uow) {
            txn.ready = Some(info.clone());
        }
        Ok(info)
    }

    /// No-op for this host: attempts are already durable in-process the
    /// moment `tpc_begin` created them. Present to satisfy the 2PC
    /// shape a host's unit-of-work manager drives every participant
    /// through (spec §4.7).
    pub async fn commit(&self, uow: UowId) -> Result<()> {
        if !self.transactions.lock().unwrap().contains_key(&uow) {
            return Err(WebhookError::UnitOfWorkNotJoined(uow));
        }
        Ok(())
    }

    /// Phase 2 finish: hands the prepared shipment to the delivery
    /// engine and forgets this unit of work. Per spec §4.7, `tpc_finish`
    /// MUST NOT raise; failures are logged and swallowed since the
    /// attempts are already durable and a later sweep can retry them.
    pub async fn tpc_finish(&self, uow: UowId, engine: &crate::delivery_engine::DeliveryEngine) {
        let ready = self.transactions.lock().unwrap().remove(&uow).and_then(|t| t.ready);
        match ready {
            Some(info) if !info.is_empty() => {
                debug!(%uow, pairs = info.pairs.len(), "handing shipment to delivery engine");
                engine.accept_for_delivery(info).await;
            }
            Some(_) => debug!(%uow, "tpc_finish: nothing to ship"),
            None => warn!(%uow, "tpc_finish called without a prior tpc_vote"),
        }
    }

    /// Rolls back every attempt this unit of work created, for both the
    /// two-phase (`tpc_abort`) and one-phase (`abort`) paths (spec
    /// §4.7). Identical behavior either way since nothing irreversible
    /// happens before `tpc_finish`.
    pub async fn tpc_abort(&self, uow: UowId) {
        self.abort(uow).await
    }

    pub async fn abort(&self, uow: UowId) {
        let txn = self.transactions.lock().unwrap().remove(&uow);
        let Some(txn) = txn else { return };
        for entry in txn.created {
            entry.subscription.remove_attempt(entry.attempt_id).await;
        }
        info!(%uow, "unit of work aborted, delivery attempts rolled back");
    }
}

fn sub_dialect_name(dialect: &Arc<dyn Dialect>) -> Option<String> {
    let name = dialect.name();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
