use crate::boundary::{ExternalizationFormat, Externalizer};
use crate::domain_object::{DomainObject, ObjectEvent};
use crate::error::WebhookError;
use crate::shipment::ShipmentPair;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// The final HTTP request shape a `Dialect` produces for one pair
/// (spec §4.2 `prepareRequest`), before the engine hands it to an HTTP
/// client.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Converts a `(data, event)` pair into request bytes + HTTP method +
/// headers (spec §4.2). Implementations may override `prepare_request`
/// to inject authentication headers or signatures; they must only read
/// pre-captured fields off `pair`, never walk back into a persistent
/// store, since `prepare_request` runs outside any unit of work (spec
/// §4.2 caution).
pub trait Dialect: Send + Sync {
    fn name(&self) -> &str;

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn user_agent(&self) -> &str {
        "webhooks-core/0.1"
    }

    fn http_method(&self) -> &str {
        "POST"
    }

    fn externalizer_format(&self) -> ExternalizationFormat {
        ExternalizationFormat::Json
    }

    fn externalizer_name(&self) -> Option<&str> {
        None
    }

    fn externalizer_policy_name(&self) -> Option<&str> {
        None
    }

    /// Finds the payload-producing adapter using the four-step lookup
    /// in spec §4.2 and serializes the result. The default
    /// implementation delegates entirely to the injected
    /// `Externalizer`, which owns steps (a)-(d).
    fn externalize_data(
        &self,
        externalizer: &dyn Externalizer,
        data: &dyn DomainObject,
        event: &ObjectEvent,
    ) -> Result<Vec<u8>, WebhookError> {
        externalizer.to_external_representation(
            data,
            event,
            self.externalizer_format(),
            self.externalizer_name(),
            self.externalizer_policy_name(),
        )
    }

    fn prepare_request(&self, pair: &ShipmentPair) -> PreparedRequest {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), self.content_type().to_string());
        headers.insert("User-Agent".to_string(), self.user_agent().to_string());
        PreparedRequest {
            method: self.http_method().to_string(),
            url: pair.to.clone(),
            headers,
            body: pair.payload.to_vec(),
        }
    }
}

/// The dialect that is always registered, under the empty name (spec
/// §3 `Dialect`, §4.2: "the default dialect is always registered").
pub struct DefaultDialect;

impl Dialect for DefaultDialect {
    fn name(&self) -> &str {
        ""
    }
}

/// A named dialect that signs the request body with HMAC-SHA256 and
/// attaches the signature as a header, the way the teacher's own
/// outbox dispatcher signs outgoing webhooks
/// (`webhooks.rs::sign_payload`). Supplements the bare spec, which
/// only gestures at "HMAC signatures, etc." as an example override.
pub struct HmacSigningDialect {
    name: String,
    inner: DefaultDialect,
    secret: String,
    header_name: String,
}

impl HmacSigningDialect {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: DefaultDialect,
            secret: secret.into(),
            header_name: "X-Webhook-Signature".to_string(),
        }
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Dialect for HmacSigningDialect {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare_request(&self, pair: &ShipmentPair) -> PreparedRequest {
        let mut req = self.inner.prepare_request(pair);
        let signature = self.sign(&req.body);
        req.headers.insert(self.header_name.clone(), signature);
        req
    }
}

/// Process-wide registry of named dialects (spec §3: "Dialects are
/// looked up by name from a process-wide registry; the default is
/// always available under the empty name").
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        let mut dialects: HashMap<String, Arc<dyn Dialect>> = HashMap::new();
        dialects.insert("".to_string(), Arc::new(DefaultDialect));
        Self { dialects }
    }

    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        self.dialects.insert(dialect.name().to_string(), dialect);
    }

    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn Dialect>, WebhookError> {
        let key = name.unwrap_or("");
        self.dialects
            .get(key)
            .cloned()
            .ok_or_else(|| WebhookError::UnknownDialect(key.to_string()))
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
