use thiserror::Error;

/// Errors surfaced across the webhook delivery core.
///
/// Per the error handling design: only configuration-time and
/// precondition failures are meant to reach a caller. Delivery-time
/// failures are captured on the affected `DeliveryAttempt` instead and
/// never propagate back to the originating unit of work.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("destination must use https://, got: {0}")]
    NotHttps(String),

    #[error("destination host could not be resolved: {0}")]
    UnresolvableHost(String),

    #[error("invalid destination url: {0}")]
    InvalidUrl(String),

    #[error("unknown dialect: {0}")]
    UnknownDialect(String),

    #[error("owner id must not contain whitespace: {0:?}")]
    InvalidOwnerId(String),

    #[error("attempt is already resolved and cannot be modified again")]
    AttemptAlreadyResolved,

    #[error("unit of work {0} has not been joined by the outbox")]
    UnitOfWorkNotJoined(crate::ids::UowId),

    #[error("unit of work {expected} is already active; cannot join {actual} concurrently")]
    UnitOfWorkMismatch {
        expected: crate::ids::UowId,
        actual: crate::ids::UowId,
    },

    #[error("store conflict, retry")]
    StoreConflict,

    #[error("store error: {0}")]
    Store(String),

    #[error("delivery drain timed out before all shipments finished")]
    DrainTimedOut,

    #[error("delivery task panicked: {0}")]
    DeliveryTaskPanicked(String),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(crate::ids::SubscriptionId),

    #[error("externalization failed: {0}")]
    Externalization(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
