use crate::delivery_attempt::AttemptStatus;
use crate::events::{EventObserver, WebhookEvent};
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub const FAILURE_LIMIT_MESSAGE: &str = "Delivery suspended due to too many delivery failures.";
pub const PRECONDITION_LIMIT_MESSAGE: &str = "Delivery suspended due to too many precondition failures.";

/// If the containing subscription's stored attempts exceed
/// `attempt_limit`, deletes already-resolved attempts in insertion
/// order until size <= limit (spec §4.9).
pub struct PruneOnResolutionHandler;

#[async_trait]
impl EventObserver for PruneOnResolutionHandler {
    async fn handle(&self, event: WebhookEvent, subscription: &Arc<Subscription>) {
        if !matches!(
            event,
            WebhookEvent::AttemptSucceeded { .. } | WebhookEvent::AttemptFailed { .. }
        ) {
            return;
        }
        let limit = subscription.attempt_limit().await as usize;
        let snapshot = subscription.attempts_snapshot().await;
        if snapshot.len() <= limit {
            return;
        }
        let mut to_remove = Vec::new();
        let mut remaining = snapshot.len();
        for (key, attempt) in &snapshot {
            if remaining <= limit {
                break;
            }
            if attempt.status().is_terminal() {
                to_remove.push(key.clone());
                remaining -= 1;
            }
        }
        if !to_remove.is_empty() {
            info!(subscription_id = %subscription.id, count = to_remove.len(), "pruning resolved attempts");
            subscription.prune_keys(&to_remove).await;
        }
    }
}

/// If the container is at the limit and every stored attempt is
/// `Failed`, deactivates the subscription (spec §4.9).
pub struct DeactivateOnAllFailedHandler;

#[async_trait]
impl EventObserver for DeactivateOnAllFailedHandler {
    async fn handle(&self, event: WebhookEvent, subscription: &Arc<Subscription>) {
        if !matches!(event, WebhookEvent::AttemptFailed { .. }) {
            return;
        }
        let limit = subscription.attempt_limit().await as usize;
        let snapshot = subscription.attempts_snapshot().await;
        if snapshot.len() < limit {
            return;
        }
        let all_failed = snapshot
            .iter()
            .all(|(_, a)| a.status() == AttemptStatus::Failed);
        if all_failed {
            info!(subscription_id = %subscription.id, "deactivating after all-failed attempt cap");
            subscription.set_active(false, FAILURE_LIMIT_MESSAGE).await;
        }
    }
}

/// Deactivates a subscription whose consecutive-precondition-failure
/// counter reached its limit (spec §4.4.2, §4.9).
pub struct DeactivateOnPreconditionFailureHandler;

#[async_trait]
impl EventObserver for DeactivateOnPreconditionFailureHandler {
    async fn handle(&self, event: WebhookEvent, subscription: &Arc<Subscription>) {
        if let WebhookEvent::ApplicabilityPreconditionFailureLimitReached { .. } = event {
            info!(subscription_id = %subscription.id, "deactivating after precondition failure cap");
            subscription.set_active(false, PRECONDITION_LIMIT_MESSAGE).await;
        }
    }
}

/// The default observer set every `SubscriptionManager` registers
/// itself with (spec §4.9).
pub fn default_observers() -> Vec<Arc<dyn EventObserver>> {
    vec![
        Arc::new(PruneOnResolutionHandler),
        Arc::new(DeactivateOnAllFailedHandler),
        Arc::new(DeactivateOnPreconditionFailureHandler),
    ]
}
