use std::collections::HashMap;
use std::sync::Mutex;

use webhooks_core::boundary::{ExternalizationFormat, Externalizer};
use webhooks_core::{DomainObject, ObjectEvent, ObjectRef, TypeTag, WebhookError};

/// A domain object this demo host doesn't know the shape of ahead of
/// time: callers hand the dispatcher a type tag, an id, and a JSON
/// body over HTTP, and that's all the webhook core ever needs to know
/// about it (spec §1: the core makes no assumptions about
/// implementations).
#[derive(Debug)]
pub struct GenericRecord {
    pub object_id: String,
    pub type_tag: String,
    pub owner: Option<String>,
}

impl DomainObject for GenericRecord {
    fn type_tags(&self) -> Vec<TypeTag> {
        vec![TypeTag::owned(self.type_tag.clone())]
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new("webhook-dispatcher", self.object_id.clone())
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// Externalizes a `GenericRecord` by looking up the JSON body staged
/// for its `ObjectRef` at accumulation time. Stands in for the
/// four-step named-adapter lookup in spec §4.2: with no per-type Rust
/// adapters to dispatch to in a generic host, the "adapter" is simply
/// whatever body the caller posted alongside the event.
#[derive(Default)]
pub struct StagedJsonExternalizer {
    staged: Mutex<HashMap<ObjectRef, serde_json::Value>>,
}

impl StagedJsonExternalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the payload for an object ref, to be consumed exactly
    /// once by the externalizer step that follows in the same request.
    pub fn stage(&self, object_ref: ObjectRef, payload: serde_json::Value) {
        self.staged.lock().unwrap().insert(object_ref, payload);
    }
}

impl Externalizer for StagedJsonExternalizer {
    fn to_external_representation(
        &self,
        data: &dyn DomainObject,
        _event: &ObjectEvent,
        _format: ExternalizationFormat,
        _name: Option<&str>,
        _policy_name: Option<&str>,
    ) -> Result<Vec<u8>, WebhookError> {
        let object_ref = data.object_ref();
        let payload = self
            .staged
            .lock()
            .unwrap()
            .remove(&object_ref)
            .ok_or_else(|| WebhookError::Externalization(format!("no staged payload for {object_ref}")))?;
        serde_json::to_vec(&payload).map_err(|e| WebhookError::Externalization(e.to_string()))
    }
}
