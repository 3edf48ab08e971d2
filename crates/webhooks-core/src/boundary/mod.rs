//! External collaborators the core consumes through narrow interfaces
//! (spec §1, §6). The core makes no assumptions about their concrete
//! implementations beyond these traits; `crate::testing` provides
//! in-memory reference implementations, and the sibling
//! `webhooks-postgres` crate provides a durable `WebhookStore`.

pub mod auth;
pub mod externalizer;
pub mod store;

pub use auth::{Authentication, Permission, PermissionChecker, Principal};
pub use externalizer::{ExternalizationFormat, Externalizer, WebhookPayload};
pub use store::{AttemptOutcome, SubscriptionSnapshot, WebhookStore};
