//! Core webhook subscription and delivery model: host-agnostic domain
//! types plus the outbox/delivery-engine machinery that turns object
//! events into HTTP deliveries. Hosts plug in their own
//! `Authentication`, `PermissionChecker`, `Externalizer`, and
//! `WebhookStore` (see `boundary`); the sibling `webhooks-postgres`
//! crate provides a durable `WebhookStore`.

pub mod boundary;
pub mod config;
pub mod delivery_attempt;
pub mod delivery_engine;
pub mod destination_validator;
pub mod dialect;
pub mod domain_object;
pub mod error;
pub mod events;
pub mod ids;
pub mod outbox;
pub mod registry;
pub mod retention;
pub mod shipment;
pub mod subscription;
pub mod subscription_manager;

pub mod testing;

pub use config::{DeclaredSubscription, SchemaManager};
pub use delivery_attempt::{AttemptStatus, DeliveryAttempt, Request, Response};
pub use delivery_engine::DeliveryEngine;
pub use destination_validator::{DefaultDestinationValidator, DestinationValidator};
pub use dialect::{DefaultDialect, Dialect, DialectRegistry, HmacSigningDialect};
pub use domain_object::{DomainObject, EventKind, ObjectEvent, TypeTag};
pub use error::{Result, WebhookError};
pub use events::{EventObserver, WebhookEvent};
pub use ids::{AttemptId, ManagerId, ObjectRef, PermissionId, PrincipalId, SiteId, SubscriptionId, UowId};
pub use outbox::Outbox;
pub use registry::Registry;
pub use shipment::{ShipmentInfo, ShipmentPair};
pub use subscription::{Applicability, Subscription};
pub use subscription_manager::SubscriptionManager;
