use crate::boundary::{Authentication, PermissionChecker};
use crate::domain_object::{DomainObject, EventKind, ObjectEvent, TypeTag};
use crate::error::{Result, WebhookError};
use crate::events::{EventObserver, WebhookEvent};
use crate::ids::{ManagerId, ObjectRef, PermissionId, PrincipalId, SubscriptionId};
use crate::retention::default_observers;
use crate::subscription::{Applicability, Subscription};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Site-scoped container of subscriptions (spec §4.5). Registers
/// active ones for `(for_, when) -> subscription` lookup; owns its
/// subscriptions exclusively.
pub struct SubscriptionManager {
    pub id: ManagerId,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
    active_index: RwLock<HashMap<(TypeTag, EventKind), HashSet<SubscriptionId>>>,
    observers: Vec<Arc<dyn EventObserver>>,
}

impl SubscriptionManager {
    pub fn new() -> Arc<Self> {
        Self::with_observers(default_observers())
    }

    pub fn with_observers(observers: Vec<Arc<dyn EventObserver>>) -> Arc<Self> {
        Arc::new(Self {
            id: ManagerId::new(),
            subscriptions: RwLock::new(HashMap::new()),
            active_index: RwLock::new(HashMap::new()),
            observers,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_subscription(
        &self,
        to: impl Into<String>,
        for_: TypeTag,
        when: Option<EventKind>,
        owner_id: Option<PrincipalId>,
        permission_id: Option<PermissionId>,
        dialect_id: Option<String>,
    ) -> Result<Arc<Subscription>> {
        let sub = Arc::new(Subscription::new(
            self.id,
            for_,
            when,
            to,
            owner_id,
            permission_id,
            dialect_id,
        )?);
        self.subscriptions.write().await.insert(sub.id, sub.clone());
        Ok(sub)
    }

    /// Inserts an already-constructed subscription directly, bypassing
    /// `create_subscription`'s HTTPS enforcement. Test-only: pairs with
    /// `Subscription::for_testing_insecure`.
    #[doc(hidden)]
    pub async fn insert_for_testing(&self, sub: Arc<Subscription>) {
        self.subscriptions.write().await.insert(sub.id, sub);
    }

    pub async fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.read().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.read().await.values().cloned().collect()
    }

    /// Registers a subscription for dispatch. Publishes `IRegistered`
    /// in the original; here that's realized directly as flipping
    /// `active` (spec §4.5).
    pub async fn activate_subscription(&self, id: SubscriptionId) -> Result<()> {
        let sub = self
            .get(id)
            .await
            .ok_or(WebhookError::SubscriptionNotFound(id))?;
        sub.set_active(true, String::new()).await;
        self.active_index
            .write()
            .await
            .entry((sub.for_.clone(), sub.when.clone()))
            .or_default()
            .insert(id);
        Ok(())
    }

    /// Deregisters a subscription, clearing `active` and recording the
    /// status message explaining why (spec §4.5).
    pub async fn deactivate_subscription(&self, id: SubscriptionId, status_message: impl Into<String>) -> Result<()> {
        let sub = self
            .get(id)
            .await
            .ok_or(WebhookError::SubscriptionNotFound(id))?;
        sub.set_active(false, status_message).await;
        let mut index = self.active_index.write().await;
        if let Some(set) = index.get_mut(&(sub.for_.clone(), sub.when.clone())) {
            set.remove(&id);
        }
        Ok(())
    }

    /// Removes a subscription from this manager entirely, deactivating
    /// it first (spec §4.5).
    pub async fn remove_subscription(&self, id: SubscriptionId) -> Result<()> {
        let _ = self.deactivate_subscription(id, "removed from manager").await;
        self.subscriptions.write().await.remove(&id);
        Ok(())
    }

    pub async fn delete_subscriptions_for_principal(&self, principal_id: &PrincipalId) {
        let matching: Vec<SubscriptionId> = {
            let subs = self.subscriptions.read().await;
            subs.values()
                .filter(|s| s.owner_id.as_ref() == Some(principal_id))
                .map(|s| s.id)
                .collect()
        };
        for id in matching {
            let _ = self.remove_subscription(id).await;
        }
    }

    /// Active subscriptions registered for `(for_, when)` combinations
    /// present on this `(data, event)` pair — a constant-time registry
    /// lookup, no applicability check yet (spec §4.5 `activeSubscriptions`).
    pub async fn active_subscriptions(
        &self,
        data: &dyn DomainObject,
        event: &ObjectEvent,
    ) -> Vec<Arc<Subscription>> {
        let index = self.active_index.read().await;
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for tag in data.type_tags() {
            for kind in &event.kind_tags {
                if let Some(ids) = index.get(&(tag.clone(), kind.clone())) {
                    for id in ids {
                        if seen.insert(*id) {
                            if let Some(sub) = self.subscriptions.read().await.get(id).cloned() {
                                result.push(sub);
                            }
                        }
                    }
                }
            }
        }
        result
    }

    /// Active and applicable (spec §4.5 `subscriptionsToDeliver`).
    /// Also drives the precondition-failure counter and fires
    /// `ApplicabilityPreconditionFailureLimitReached` through the
    /// observer list when a subscription's limit is reached (spec
    /// §4.4.2).
    pub async fn subscriptions_to_deliver(
        &self,
        data: &dyn DomainObject,
        event: &ObjectEvent,
        object_ref: &ObjectRef,
        auth: &dyn Authentication,
        checker: &dyn PermissionChecker,
    ) -> Vec<Arc<Subscription>> {
        let candidates = self.active_subscriptions(data, event).await;
        let mut deliverable = Vec::new();
        for sub in candidates {
            let outcome = sub.applicability(data, object_ref, auth, checker).await;
            if let Some(_limit_reached) = sub.record_applicability_outcome(outcome).await {
                self.publish(
                    WebhookEvent::ApplicabilityPreconditionFailureLimitReached { subscription_id: sub.id },
                    &sub,
                )
                .await;
            }
            if outcome == Applicability::Allow {
                deliverable.push(sub);
            }
        }
        deliverable
    }

    /// Runs every registered observer, then reconciles `active_index`
    /// against the subscription's current `active` flag. Retention
    /// handlers (spec §4.9) deactivate a subscription by flipping that
    /// flag directly on the detached `Subscription`, which cannot reach
    /// back into this manager's lookup table itself; this is the one
    /// place that keeps the index truthful afterward (spec §8: "S.active
    /// is true iff S is registered in its manager's lookup table").
    pub async fn publish(&self, event: WebhookEvent, subscription: &Arc<Subscription>) {
        for observer in &self.observers {
            observer.handle(event, subscription).await;
        }
        if !subscription.is_active().await {
            let mut index = self.active_index.write().await;
            if let Some(set) = index.get_mut(&(subscription.for_.clone(), subscription.when.clone())) {
                set.remove(&subscription.id);
            }
        }
    }
}
