use crate::boundary::{Authentication, PermissionChecker};
use crate::delivery_attempt::{DeliveryAttempt, Request, VALIDATION_FAILURE_MESSAGE};
use crate::destination_validator::DestinationValidator;
use crate::domain_object::{DomainObject, EventKind, TypeTag};
use crate::error::{Result, WebhookError};
use crate::ids::{AttemptId, ManagerId, ObjectRef, PermissionId, PrincipalId, SubscriptionId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub const DEFAULT_ATTEMPT_LIMIT: u32 = 50;
pub const DEFAULT_PRECONDITION_FAILURE_LIMIT: u32 = 50;

static ATTEMPT_KEY_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_attempt_key() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = ATTEMPT_KEY_SEQ.fetch_add(1, Ordering::Relaxed);
    // Zero-padded so lexicographic BTreeMap order matches insertion
    // (time) order even across a clock that doesn't advance between
    // two attempts created in the same unit of work.
    format!("{nanos:020}-{seq:010}")
}

/// Tri-state result of the applicability security check (spec §4.4.1,
/// §9 design notes: "use a tagged variant rather than overloading
/// booleans"). `Missing` means the principal or permission could not
/// be located at all, distinct from an explicit `Deny`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applicability {
    Allow,
    Deny,
    Missing,
}

impl Applicability {
    pub fn is_allow(self) -> bool {
        matches!(self, Applicability::Allow)
    }
}

/// Returned when a subscription's consecutive-precondition-failure
/// counter reaches its limit (spec §4.4.2).
pub struct PreconditionLimitReached;

struct Mutable {
    active: bool,
    status_message: String,
    attempt_limit: u32,
    applicable_precondition_failure_limit: u32,
    modified_time: DateTime<Utc>,
    attempts: BTreeMap<String, DeliveryAttempt>,
    precondition_failure_count: u32,
}

/// A durable policy: "send object events matching `(for_, when)` to
/// `to`" (spec §3). Owns its `DeliveryAttempt` children exclusively.
pub struct Subscription {
    pub id: SubscriptionId,
    pub manager_id: ManagerId,
    pub for_: TypeTag,
    pub when: EventKind,
    pub to: String,
    pub owner_id: Option<PrincipalId>,
    pub permission_id: Option<PermissionId>,
    pub dialect_id: Option<String>,
    pub created_time: DateTime<Utc>,
    mutable: RwLock<Mutable>,
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager_id: ManagerId,
        for_: TypeTag,
        when: Option<EventKind>,
        to: impl Into<String>,
        owner_id: Option<PrincipalId>,
        permission_id: Option<PermissionId>,
        dialect_id: Option<String>,
    ) -> Result<Self> {
        Self::new_impl(manager_id, for_, when, to, owner_id, permission_id, dialect_id, true)
    }

    /// Identical to `new`, except it doesn't enforce the HTTPS-only
    /// invariant. Exists so integration tests can point a subscription
    /// at a plain-HTTP loopback mock server; never use this outside
    /// tests.
    #[doc(hidden)]
    #[allow(clippy::too_many_arguments)]
    pub fn for_testing_insecure(
        manager_id: ManagerId,
        for_: TypeTag,
        when: Option<EventKind>,
        to: impl Into<String>,
        owner_id: Option<PrincipalId>,
        permission_id: Option<PermissionId>,
        dialect_id: Option<String>,
    ) -> Result<Self> {
        Self::new_impl(manager_id, for_, when, to, owner_id, permission_id, dialect_id, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_impl(
        manager_id: ManagerId,
        for_: TypeTag,
        when: Option<EventKind>,
        to: impl Into<String>,
        owner_id: Option<PrincipalId>,
        permission_id: Option<PermissionId>,
        dialect_id: Option<String>,
        enforce_https: bool,
    ) -> Result<Self> {
        let to = to.into();
        if enforce_https && !to.starts_with("https://") {
            return Err(WebhookError::NotHttps(to));
        }
        if let Some(PrincipalId(ref s)) = owner_id {
            if s.chars().any(char::is_whitespace) {
                return Err(WebhookError::InvalidOwnerId(s.clone()));
            }
        }
        // Owner set but no explicit permission: default to the
        // generic "view" permission (spec §3).
        let permission_id = match (&owner_id, permission_id) {
            (Some(_), None) => Some(PermissionId::default_view()),
            (_, p) => p,
        };
        let now = Utc::now();
        Ok(Self {
            id: SubscriptionId::new(),
            manager_id,
            for_,
            when: when.unwrap_or_default(),
            to,
            owner_id,
            permission_id,
            dialect_id,
            created_time: now,
            mutable: RwLock::new(Mutable {
                active: false,
                status_message: String::new(),
                attempt_limit: DEFAULT_ATTEMPT_LIMIT,
                applicable_precondition_failure_limit: DEFAULT_PRECONDITION_FAILURE_LIMIT,
                modified_time: now,
                attempts: BTreeMap::new(),
                precondition_failure_count: 0,
            }),
        })
    }

    pub async fn is_active(&self) -> bool {
        self.mutable.read().await.active
    }

    pub async fn status_message(&self) -> String {
        self.mutable.read().await.status_message.clone()
    }

    pub async fn attempt_count(&self) -> usize {
        self.mutable.read().await.attempts.len()
    }

    pub async fn attempt_limit(&self) -> u32 {
        self.mutable.read().await.attempt_limit
    }

    pub async fn set_attempt_limit(&self, limit: u32) {
        self.mutable.write().await.attempt_limit = limit;
    }

    pub async fn set_applicable_precondition_failure_limit(&self, limit: u32) {
        self.mutable.write().await.applicable_precondition_failure_limit = limit;
    }

    pub async fn applicable_precondition_failure_limit(&self) -> u32 {
        self.mutable.read().await.applicable_precondition_failure_limit
    }

    pub async fn modified_time(&self) -> DateTime<Utc> {
        self.mutable.read().await.modified_time
    }

    /// Attempt ids in insertion (time-sortable) order.
    pub async fn attempt_ids_in_order(&self) -> Vec<AttemptId> {
        self.mutable.read().await.attempts.values().map(|a| a.id).collect()
    }

    pub async fn get_attempt(&self, id: AttemptId) -> Option<DeliveryAttempt> {
        self.mutable
            .read()
            .await
            .attempts
            .values()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Only the owning `SubscriptionManager` calls this (spec §3:
    /// "never directly by clients"). Registration/deregistration also
    /// sets the status message explaining the current state.
    pub(crate) async fn set_active(&self, active: bool, status_message: impl Into<String>) {
        let mut m = self.mutable.write().await;
        m.active = active;
        m.status_message = status_message.into();
        m.modified_time = Utc::now();
        if active {
            m.precondition_failure_count = 0;
        }
    }

    /// Type match only; the security half of applicability lives in
    /// `applicability` below (spec §4.4.1 splits the two).
    pub fn matches_type(&self, data: &dyn DomainObject) -> bool {
        data.type_tags().contains(&self.for_)
    }

    /// Full tri-state applicability check (spec §4.4.1).
    pub async fn applicability(
        &self,
        data: &dyn DomainObject,
        object_ref: &ObjectRef,
        auth: &dyn Authentication,
        checker: &dyn PermissionChecker,
    ) -> Applicability {
        if !self.matches_type(data) {
            return Applicability::Deny;
        }
        if self.owner_id.is_none() && self.permission_id.is_none() {
            return Applicability::Allow;
        }
        let principal = match &self.owner_id {
            Some(pid) => auth.get_principal(pid).await,
            None => Some(auth.unauthenticated_principal()),
        };
        let permission = match &self.permission_id {
            Some(perm_id) => auth.get_permission(perm_id).await,
            None => None,
        };
        match (principal, permission) {
            (Some(p), Some(perm)) => {
                if checker.check_permission(&p, &perm, object_ref).await {
                    Applicability::Allow
                } else {
                    Applicability::Deny
                }
            }
            _ => Applicability::Missing,
        }
    }

    /// `isApplicable`: maps `Missing` to `false` (spec §4.4.1).
    pub async fn is_applicable(
        &self,
        data: &dyn DomainObject,
        object_ref: &ObjectRef,
        auth: &dyn Authentication,
        checker: &dyn PermissionChecker,
    ) -> bool {
        self.applicability(data, object_ref, auth, checker).await.is_allow()
    }

    /// Tracks consecutive `Missing` outcomes (spec §4.4.2). Called by
    /// the dispatch path after it computes `applicability` itself (so
    /// it can distinguish `Missing` from explicit `Deny`, which
    /// `isApplicable` alone cannot). Returns `Some` the call that tips
    /// the counter over its limit.
    pub async fn record_applicability_outcome(
        &self,
        outcome: Applicability,
    ) -> Option<PreconditionLimitReached> {
        let mut m = self.mutable.write().await;
        match outcome {
            Applicability::Missing => {
                m.precondition_failure_count += 1;
                if m.precondition_failure_count >= m.applicable_precondition_failure_limit {
                    Some(PreconditionLimitReached)
                } else {
                    None
                }
            }
            _ => {
                m.precondition_failure_count = 0;
                None
            }
        }
    }

    /// Constructs a new pending attempt, attaches it as a child under
    /// a time-sortable key, and runs destination pre-flight validation
    /// (spec §4.4.3). Validation failure immediately resolves the
    /// attempt to `Failed` with the well-known message.
    pub async fn create_delivery_attempt(
        &self,
        payload: &[u8],
        method: &str,
        headers: std::collections::BTreeMap<String, String>,
        validator: &dyn DestinationValidator,
        txn_note: impl Into<String>,
    ) -> AttemptId {
        let request = Request::new(
            self.to.clone(),
            method.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
            headers,
        );
        let mut attempt = DeliveryAttempt::new_pending(self.id, request, txn_note);
        let attempt_id = attempt.id;

        if let Err(e) = validator.validate_target(&self.to).await {
            attempt.internal_info.record_exception(e.to_string());
            // Validation failure resolves the attempt immediately; the
            // error is structural (bad url), never a transport error,
            // so this can't itself fail the resolve() call.
            let _ = attempt.resolve(
                crate::delivery_attempt::AttemptStatus::Failed,
                VALIDATION_FAILURE_MESSAGE,
                None,
            );
        }

        let key = next_attempt_key();
        self.mutable.write().await.attempts.insert(key, attempt);
        attempt_id
    }

    /// Removes an attempt the outbox staged in this unit of work; used
    /// to roll back on `tpc_abort`/`abort` (spec §4.7).
    pub(crate) async fn remove_attempt(&self, id: AttemptId) {
        let mut m = self.mutable.write().await;
        m.attempts.retain(|_, a| a.id != id);
    }

    /// Resolves an attempt by id, as the delivery engine's write-back
    /// step does. Returns the resolved event so the caller can publish
    /// it to observers. `sent_request` replaces the captured request
    /// with the one actually sent over the wire, if the engine got far
    /// enough to build one.
    pub(crate) async fn resolve_attempt(
        &self,
        id: AttemptId,
        sent_request: Option<crate::delivery_attempt::Request>,
        status: crate::delivery_attempt::AttemptStatus,
        message: impl Into<String>,
        response: Option<crate::delivery_attempt::Response>,
    ) -> Result<crate::delivery_attempt::ResolvedEvent> {
        let mut m = self.mutable.write().await;
        let attempt = m
            .attempts
            .values_mut()
            .find(|a| a.id == id)
            .ok_or(WebhookError::AttemptAlreadyResolved)?;
        if let Some(req) = sent_request {
            attempt.set_sent_request(req);
        }
        let event = attempt.resolve(status, message, response)?;
        m.modified_time = Utc::now();
        Ok(event)
    }

    pub(crate) async fn record_exception_on_attempt(&self, id: AttemptId, text: impl Into<String>) {
        let mut m = self.mutable.write().await;
        if let Some(attempt) = m.attempts.values_mut().find(|a| a.id == id) {
            attempt.internal_info.record_exception(text);
        }
    }

    /// All attempts currently stored, in insertion order, with their
    /// keys — used by the retention pruning handler.
    pub(crate) async fn attempts_snapshot(&self) -> Vec<(String, DeliveryAttempt)> {
        self.mutable
            .read()
            .await
            .attempts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) async fn prune_keys(&self, keys_to_remove: &[String]) {
        let mut m = self.mutable.write().await;
        for key in keys_to_remove {
            m.attempts.remove(key);
        }
    }
}
