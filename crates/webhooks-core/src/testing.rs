//! In-memory reference implementations of every boundary trait, for
//! tests and small demos (spec §6, mirroring `nti.webhooks`'s own
//! `testing.py`). Nothing here is meant for production use; hosts
//! wire up their own `Authentication`/`PermissionChecker`/`Externalizer`
//! and the sibling `webhooks-postgres` crate's `WebhookStore`.

use crate::boundary::{
    AttemptOutcome, Authentication, ExternalizationFormat, Externalizer, Permission, PermissionChecker,
    Principal, SubscriptionSnapshot, WebhookStore,
};
use crate::delivery_attempt::Request;
use crate::destination_validator::DestinationValidator;
use crate::domain_object::{DomainObject, ObjectEvent};
use crate::error::WebhookError;
use crate::ids::{AttemptId, ObjectRef, PermissionId, PrincipalId, SubscriptionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Grants every principal every permission. Useful for tests that
/// don't exercise the applicability security check.
pub struct AllowAllAuthentication;

#[async_trait]
impl Authentication for AllowAllAuthentication {
    async fn get_principal(&self, id: &PrincipalId) -> Option<Principal> {
        Some(Principal { id: id.clone() })
    }

    fn unauthenticated_principal(&self) -> Principal {
        Principal { id: PrincipalId("unauthenticated".to_string()) }
    }

    async fn get_permission(&self, id: &PermissionId) -> Option<Permission> {
        Some(Permission { id: id.clone() })
    }
}

#[async_trait]
impl PermissionChecker for AllowAllAuthentication {
    async fn check_permission(&self, _principal: &Principal, _permission: &Permission, _object_ref: &ObjectRef) -> bool {
        true
    }
}

/// An authentication boundary backed by explicit in-memory principal
/// and permission sets, so tests can exercise `Missing` (absent
/// principal) vs. `Deny` (present principal, permission check fails).
pub struct FixedAuthentication {
    principals: HashMap<PrincipalId, Principal>,
    permissions: HashMap<PermissionId, Permission>,
    denied: std::collections::HashSet<(PrincipalId, PermissionId)>,
}

impl FixedAuthentication {
    pub fn new() -> Self {
        Self {
            principals: HashMap::new(),
            permissions: HashMap::new(),
            denied: std::collections::HashSet::new(),
        }
    }

    pub fn with_principal(mut self, id: PrincipalId) -> Self {
        self.principals.insert(id.clone(), Principal { id });
        self
    }

    pub fn with_permission(mut self, id: PermissionId) -> Self {
        self.permissions.insert(id.clone(), Permission { id });
        self
    }

    pub fn deny(mut self, principal: PrincipalId, permission: PermissionId) -> Self {
        self.denied.insert((principal, permission));
        self
    }
}

impl Default for FixedAuthentication {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authentication for FixedAuthentication {
    async fn get_principal(&self, id: &PrincipalId) -> Option<Principal> {
        self.principals.get(id).cloned()
    }

    fn unauthenticated_principal(&self) -> Principal {
        Principal { id: PrincipalId(String::new()) }
    }

    async fn get_permission(&self, id: &PermissionId) -> Option<Permission> {
        self.permissions.get(id).cloned()
    }
}

#[async_trait]
impl PermissionChecker for FixedAuthentication {
    async fn check_permission(&self, principal: &Principal, permission: &Permission, _object_ref: &ObjectRef) -> bool {
        !self.denied.contains(&(principal.id.clone(), permission.id.clone()))
    }
}

/// Accepts every destination unconditionally, including plain HTTP
/// loopback addresses a mock server binds to. Never use outside tests.
pub struct AllowAllDestinationValidator;

#[async_trait]
impl DestinationValidator for AllowAllDestinationValidator {
    async fn validate_target(&self, _url: &str) -> Result<(), WebhookError> {
        Ok(())
    }
}

/// Serializes any `DomainObject` that also implements `serde::Serialize`
/// through a caller-supplied closure; exists so tests don't need a real
/// adapter registry to produce JSON bytes.
pub struct ClosureExternalizer<F>(pub F)
where
    F: Fn(&dyn DomainObject, &ObjectEvent) -> Result<Vec<u8>, WebhookError> + Send + Sync;

impl<F> Externalizer for ClosureExternalizer<F>
where
    F: Fn(&dyn DomainObject, &ObjectEvent) -> Result<Vec<u8>, WebhookError> + Send + Sync,
{
    fn to_external_representation(
        &self,
        data: &dyn DomainObject,
        event: &ObjectEvent,
        _format: ExternalizationFormat,
        _name: Option<&str>,
        _policy_name: Option<&str>,
    ) -> Result<Vec<u8>, WebhookError> {
        (self.0)(data, event)
    }
}

/// In-memory `WebhookStore` — a `Mutex<HashMap<..>>` durability mirror,
/// for tests that want to assert on write-back without a database.
#[derive(Default)]
pub struct InMemoryStore {
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionSnapshot>>,
    attempts: Mutex<HashMap<(SubscriptionId, AttemptId), (Request, DateTime<Utc>)>>,
    resolutions: Mutex<HashMap<(SubscriptionId, AttemptId), AttemptOutcome>>,
    generation: Mutex<Option<(u64, Vec<String>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution_count(&self) -> usize {
        self.resolutions.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookStore for InMemoryStore {
    async fn upsert_subscription(&self, snapshot: SubscriptionSnapshot) -> Result<(), WebhookError> {
        self.subscriptions.lock().unwrap().insert(snapshot.id, snapshot);
        Ok(())
    }

    async fn record_attempt_created(
        &self,
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
        request: &Request,
        created_at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        self.attempts
            .lock()
            .unwrap()
            .insert((subscription_id, attempt_id), (request.clone(), created_at));
        Ok(())
    }

    async fn resolve_attempt(
        &self,
        subscription_id: SubscriptionId,
        attempt_id: AttemptId,
        outcome: AttemptOutcome,
    ) -> Result<(), WebhookError> {
        self.resolutions.lock().unwrap().insert((subscription_id, attempt_id), outcome);
        Ok(())
    }

    async fn prune_attempts(
        &self,
        subscription_id: SubscriptionId,
        keep_attempt_ids: &[AttemptId],
    ) -> Result<(), WebhookError> {
        let keep: std::collections::HashSet<_> = keep_attempt_ids.iter().collect();
        self.attempts
            .lock()
            .unwrap()
            .retain(|(sid, aid), _| *sid != subscription_id || keep.contains(aid));
        Ok(())
    }

    async fn deactivate_subscription(&self, subscription_id: SubscriptionId, status_message: &str) -> Result<(), WebhookError> {
        if let Some(s) = self.subscriptions.lock().unwrap().get_mut(&subscription_id) {
            s.active = false;
            s.status_message = status_message.to_string();
        }
        Ok(())
    }

    async fn activate_subscription(&self, subscription_id: SubscriptionId) -> Result<(), WebhookError> {
        if let Some(s) = self.subscriptions.lock().unwrap().get_mut(&subscription_id) {
            s.active = true;
        }
        Ok(())
    }

    async fn load_generation(&self) -> Result<Option<(u64, Vec<String>)>, WebhookError> {
        Ok(self.generation.lock().unwrap().clone())
    }

    async fn save_generation(&self, generation: u64, declared_keys: &[String]) -> Result<(), WebhookError> {
        *self.generation.lock().unwrap() = Some((generation, declared_keys.to_vec()));
        Ok(())
    }
}
