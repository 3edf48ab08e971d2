use crate::error::WebhookError;
use crate::ids::{AttemptId, SubscriptionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Headers that never leave the process attached to a captured
/// request/response (spec §9 open question, resolved in SPEC_FULL.md:
/// the original states the intent but never implements it).
const STRIPPED_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "proxy-authorization"];

fn strip_sensitive_headers(headers: &mut BTreeMap<String, String>) {
    headers.retain(|k, _| !STRIPPED_HEADERS.contains(&k.to_ascii_lowercase().as_str()));
}

/// An immutable snapshot of the HTTP request actually sent (or that
/// would have been sent, for attempts that failed pre-flight
/// validation before any request existed).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub created_time: DateTime<Utc>,
}

impl Request {
    pub fn new(url: String, method: String, body: String, mut headers: BTreeMap<String, String>) -> Self {
        strip_sensitive_headers(&mut headers);
        Self {
            url,
            method,
            body,
            headers,
            created_time: Utc::now(),
        }
    }
}

/// An immutable snapshot of the HTTP response received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub content: String,
    pub elapsed: Duration,
    pub created_time: DateTime<Utc>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Debugging metadata kept alongside an attempt: where it originated
/// and an append-only history of exceptions encountered while trying
/// to resolve it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Originated {
    pub pid: u32,
    pub hostname: String,
    pub created_time: DateTime<Utc>,
    pub txn_note: String,
}

impl Originated {
    pub fn here(txn_note: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            created_time: Utc::now(),
            txn_note: txn_note.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InternalInfo {
    pub originated: Originated,
    pub exception_history: Vec<String>,
}

impl InternalInfo {
    pub fn new(txn_note: impl Into<String>) -> Self {
        Self {
            originated: Originated::here(txn_note),
            exception_history: Vec::new(),
        }
    }

    pub fn record_exception(&mut self, text: impl Into<String>) {
        self.exception_history.push(text.into());
    }
}

/// Terminal/non-terminal state of a `DeliveryAttempt` (spec §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    Pending,
    Successful,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }
}

pub const VALIDATION_FAILURE_MESSAGE: &str =
    "Verification of the destination URL failed. Please check the domain.";
pub const TRANSPORT_FAILURE_MESSAGE: &str =
    "Contacting the remote server experienced an unexpected error.";

/// One HTTP try against one subscription for one object event (spec
/// §3, §4.3). Owned by exactly one `Subscription`; status transitions
/// exactly once from `Pending` to a terminal value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: AttemptId,
    pub subscription_id: SubscriptionId,
    status: AttemptStatus,
    pub message: String,
    pub request: Request,
    pub response: Option<Response>,
    pub internal_info: InternalInfo,
    pub created_time: DateTime<Utc>,
    modified_time: DateTime<Utc>,
}

/// Fired exactly once, when a `DeliveryAttempt` reaches a terminal
/// state (spec §3 invariants, §4.3).
#[derive(Clone, Debug)]
pub struct ResolvedEvent {
    pub subscription_id: SubscriptionId,
    pub attempt_id: AttemptId,
    pub status: AttemptStatus,
}

impl DeliveryAttempt {
    pub fn new_pending(subscription_id: SubscriptionId, request: Request, txn_note: impl Into<String>) -> Self {
        let now = request.created_time;
        Self {
            id: AttemptId::new(),
            subscription_id,
            status: AttemptStatus::Pending,
            message: String::new(),
            request,
            response: None,
            internal_info: InternalInfo::new(txn_note),
            created_time: now,
            modified_time: now,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn modified_time(&self) -> DateTime<Utc> {
        self.modified_time
    }

    /// Overwrites the captured request with the one actually sent, once
    /// the dialect has finished `prepare_request` (spec §4.8.1: the
    /// write-back step "copies the request snapshot... all headers as
    /// text"). Only effective before the attempt is resolved.
    pub fn set_sent_request(&mut self, request: Request) {
        if !self.status.is_terminal() {
            self.request = request;
            self.modified_time = Utc::now();
        }
    }

    /// Transition to a terminal status. Any second call fails with
    /// `AttemptAlreadyResolved` (spec §4.3: "any second write raises").
    pub fn resolve(
        &mut self,
        status: AttemptStatus,
        message: impl Into<String>,
        response: Option<Response>,
    ) -> Result<ResolvedEvent, WebhookError> {
        if self.status.is_terminal() {
            return Err(WebhookError::AttemptAlreadyResolved);
        }
        debug_assert!(status.is_terminal(), "resolve() requires a terminal status");
        self.status = status;
        self.message = message.into();
        self.response = response;
        self.modified_time = Utc::now();
        Ok(ResolvedEvent {
            subscription_id: self.subscription_id,
            attempt_id: self.id,
            status,
        })
    }
}
