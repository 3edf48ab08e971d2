use crate::ids::{AttemptId, SubscriptionId};
use async_trait::async_trait;
use std::sync::Arc;

/// The four event kinds the core publishes (spec §6 event boundary).
/// `AttemptResolved` in the original is abstract over success/failure;
/// here that's folded into the `status` field each resolution carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    AttemptSucceeded {
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
    },
    AttemptFailed {
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
    },
    ApplicabilityPreconditionFailureLimitReached {
        subscription_id: SubscriptionId,
    },
}

impl WebhookEvent {
    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            WebhookEvent::AttemptSucceeded { subscription_id, .. }
            | WebhookEvent::AttemptFailed { subscription_id, .. }
            | WebhookEvent::ApplicabilityPreconditionFailureLimitReached { subscription_id } => {
                *subscription_id
            }
        }
    }
}

/// An explicit observer registered on a `SubscriptionManager` (spec §9
/// design notes: replace implicit "event subscribers" dispatch with
/// explicit observer lists). Observers receive the subscription they
/// apply to already resolved, so they never have to perform their own
/// registry lookup.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn handle(&self, event: WebhookEvent, subscription: &Arc<crate::subscription::Subscription>);
}
