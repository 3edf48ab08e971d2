use crate::domain_object::{DomainObject, ObjectEvent};
use crate::error::WebhookError;
use serde::{Deserialize, Serialize};

/// Wire format for a serialized payload. JSON is the only format the
/// default dialect ever asks for; the enum exists because the spec
/// names it as a configurable field on `Dialect` (`externalizer_format`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalizationFormat {
    Json,
}

impl Default for ExternalizationFormat {
    fn default() -> Self {
        ExternalizationFormat::Json
    }
}

/// Marker a domain object can implement to claim it's already in
/// payload shape, skipping adapter lookup (spec §4.2 step (c): "data
/// itself if it already claims to be a payload").
pub trait WebhookPayload: DomainObject {
    fn as_payload_json(&self) -> serde_json::Value;
}

/// The externalization boundary (spec §6): turns a domain object
/// (optionally guided by the event that triggered delivery) into wire
/// bytes. Implementations own the four-step adapter lookup described
/// in spec §4.2; the reference implementation here performs it against
/// a small named-adapter registry.
pub trait Externalizer: Send + Sync {
    fn to_external_representation(
        &self,
        data: &dyn DomainObject,
        event: &ObjectEvent,
        format: ExternalizationFormat,
        name: Option<&str>,
        policy_name: Option<&str>,
    ) -> Result<Vec<u8>, WebhookError>;
}

/// Adapter capable of rendering one domain object type (or a family of
/// them sharing a `TypeTag`) into a JSON payload, keyed optionally by
/// name (spec §4.2 steps (a)/(b): named vs. unnamed multi-adapters) and
/// optionally by policy (redaction/shaping variants of the same
/// adapter).
pub type AdapterFn = dyn Fn(&dyn DomainObject, Option<&str>) -> Result<serde_json::Value, WebhookError>
    + Send
    + Sync;
