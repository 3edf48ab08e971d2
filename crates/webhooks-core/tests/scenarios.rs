//! End-to-end scenarios against the in-memory testing support plus a
//! real loopback HTTP server (`wiremock`), exercising the full
//! accumulate -> tpc_begin -> tpc_vote -> tpc_finish -> delivery ->
//! write-back -> observer pipeline the way a host actually drives it.

use std::sync::Arc;
use std::time::Duration;
use webhooks_core::boundary::ExternalizationFormat;
use webhooks_core::testing::{AllowAllAuthentication, AllowAllDestinationValidator, ClosureExternalizer, FixedAuthentication};
use webhooks_core::{
    DeliveryEngine, DialectRegistry, DomainObject, EventKind, ObjectEvent, ObjectRef, Outbox, PermissionId,
    PrincipalId, Registry, Subscription, SubscriptionManager, TypeTag, UowId,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug)]
struct Thing {
    id: String,
    owner: Option<String>,
}

impl DomainObject for Thing {
    fn type_tags(&self) -> Vec<TypeTag> {
        vec![TypeTag::new("Thing")]
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new("test-db", self.id.clone())
    }

    fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

fn thing_event(id: &str) -> ObjectEvent {
    ObjectEvent::new(
        EventKind::ANY_OBJECT_EVENT,
        Arc::new(Thing { id: id.to_string(), owner: None }),
    )
}

fn json_externalizer() -> Arc<ClosureExternalizer<impl Fn(&dyn DomainObject, &ObjectEvent) -> Result<Vec<u8>, webhooks_core::WebhookError> + Send + Sync>> {
    Arc::new(ClosureExternalizer(|data: &dyn DomainObject, _event: &ObjectEvent| {
        Ok(serde_json::json!({ "object_ref": data.object_ref().to_string() })
            .to_string()
            .into_bytes())
    }))
}

/// Shared harness: one manager, one registry wrapping it, an outbox
/// pointed at an allow-all validator (mock servers are plain HTTP) and
/// a JSON externalizer, and a delivery engine with no durable store.
struct Harness {
    manager: Arc<SubscriptionManager>,
    registry: Arc<Registry>,
    outbox: Outbox,
    engine: DeliveryEngine,
}

fn harness() -> Harness {
    let manager = SubscriptionManager::new();
    let registry = Registry::new(manager.clone());
    let dialects = Arc::new(DialectRegistry::new());
    let externalizer = json_externalizer();
    let validator: Arc<dyn webhooks_core::DestinationValidator> = Arc::new(AllowAllDestinationValidator);
    let outbox = Outbox::new(dialects, externalizer, validator, None);
    let engine = DeliveryEngine::new(registry.clone(), None);
    Harness { manager, registry, outbox, engine }
}

async fn insecure_subscription(manager: &SubscriptionManager, to: impl Into<String>) -> Arc<Subscription> {
    let sub = Arc::new(
        Subscription::for_testing_insecure(manager.id, TypeTag::new("Thing"), None, to, None, None, None).unwrap(),
    );
    manager.insert_for_testing(sub.clone()).await;
    manager.activate_subscription(sub.id).await.unwrap();
    sub
}

#[tokio::test]
async fn happy_path_delivers_and_resolves_successful() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let sub = insecure_subscription(&h.manager, format!("{}/hook", server.uri())).await;

    let event = thing_event("1");
    let targets = h
        .registry
        .subscriptions_to_deliver(
            event.object.as_ref(),
            &event,
            &event.object.object_ref(),
            &AllowAllAuthentication,
            &AllowAllAuthentication,
        )
        .await;
    assert_eq!(targets.len(), 1);

    let uow = UowId::new();
    h.outbox.add_subscriptions(uow, &event, &targets);
    h.outbox.tpc_begin(uow).await.unwrap();
    let shipment = h.outbox.tpc_vote(uow).await.unwrap();
    assert_eq!(shipment.pairs.len(), 1);
    h.outbox.commit(uow).await.unwrap();
    h.outbox.tpc_finish(uow, &h.engine).await;
    h.engine.wait_for_pending_deliveries().await;

    assert_eq!(sub.attempt_count().await, 1);
    let attempt_id = sub.attempt_ids_in_order().await[0];
    let attempt = sub.get_attempt(attempt_id).await.unwrap();
    assert_eq!(attempt.status(), webhooks_core::AttemptStatus::Successful);
}

#[tokio::test]
async fn abort_suppresses_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness();
    let sub = insecure_subscription(&h.manager, format!("{}/hook", server.uri())).await;

    let event = thing_event("2");
    let targets = h.manager.subscriptions_to_deliver(event.object.as_ref(), &event, &event.object.object_ref(), &AllowAllAuthentication, &AllowAllAuthentication).await;

    let uow = UowId::new();
    h.outbox.add_subscriptions(uow, &event, &targets);
    h.outbox.tpc_begin(uow).await.unwrap();
    assert_eq!(sub.attempt_count().await, 1, "attempt exists once tpc_begin runs");
    h.outbox.abort(uow).await;

    assert_eq!(sub.attempt_count().await, 0, "aborted attempt rolled back");
}

#[tokio::test]
async fn applicability_gate_denies_without_permission() {
    let h = harness();
    let owner = PrincipalId("alice".to_string());
    let permission = PermissionId::default_view();
    let auth = FixedAuthentication::new()
        .with_principal(owner.clone())
        .with_permission(permission.clone())
        .deny(owner.clone(), permission.clone());

    let sub = Arc::new(
        Subscription::for_testing_insecure(
            h.manager.id,
            TypeTag::new("Thing"),
            None,
            "http://example.invalid/hook",
            Some(owner),
            Some(permission),
            None,
        )
        .unwrap(),
    );
    h.manager.insert_for_testing(sub.clone()).await;
    h.manager.activate_subscription(sub.id).await.unwrap();

    let event = thing_event("3");
    let targets = h
        .manager
        .subscriptions_to_deliver(event.object.as_ref(), &event, &event.object.object_ref(), &auth, &auth)
        .await;
    assert!(targets.is_empty(), "denied subscription must not receive the event");
    assert!(sub.is_active().await, "a plain deny does not deactivate the subscription");
}

#[tokio::test]
async fn missing_principal_deactivates_after_limit() {
    let h = harness();
    let owner = PrincipalId("nobody".to_string());
    let sub = Arc::new(
        Subscription::for_testing_insecure(
            h.manager.id,
            TypeTag::new("Thing"),
            None,
            "http://example.invalid/hook",
            Some(owner),
            None,
            None,
        )
        .unwrap(),
    );
    sub.set_applicable_precondition_failure_limit(2).await;
    h.manager.insert_for_testing(sub.clone()).await;
    h.manager.activate_subscription(sub.id).await.unwrap();

    let auth = FixedAuthentication::new(); // owner never resolves -> Missing every time

    for n in 0..2 {
        let event = thing_event(&n.to_string());
        let targets = h
            .manager
            .subscriptions_to_deliver(event.object.as_ref(), &event, &event.object.object_ref(), &auth, &auth)
            .await;
        assert!(targets.is_empty());
    }

    assert!(!sub.is_active().await, "subscription deactivates once the precondition-failure limit is reached");
    assert_eq!(sub.status_message().await, webhooks_core::retention::PRECONDITION_LIMIT_MESSAGE);
}

#[tokio::test]
async fn retention_prunes_resolved_attempts_past_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness();
    let sub = insecure_subscription(&h.manager, format!("{}/hook", server.uri())).await;
    sub.set_attempt_limit(2).await;

    for n in 0..4 {
        let event = thing_event(&n.to_string());
        let targets = h.manager.subscriptions_to_deliver(event.object.as_ref(), &event, &event.object.object_ref(), &AllowAllAuthentication, &AllowAllAuthentication).await;
        let uow = UowId::new();
        h.outbox.add_subscriptions(uow, &event, &targets);
        h.outbox.tpc_begin(uow).await.unwrap();
        h.outbox.tpc_vote(uow).await.unwrap();
        h.outbox.commit(uow).await.unwrap();
        h.outbox.tpc_finish(uow, &h.engine).await;
    }
    h.engine.wait_for_pending_deliveries().await;
    // give the observer's async prune a moment to land after the last resolve
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(sub.attempt_count().await <= 2, "pruning keeps the container at or under the cap");
}

#[tokio::test]
async fn all_failed_attempts_deactivate_the_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let h = harness();
    let sub = insecure_subscription(&h.manager, format!("{}/hook", server.uri())).await;
    sub.set_attempt_limit(2).await;

    for n in 0..2 {
        let event = thing_event(&n.to_string());
        let targets = h.manager.subscriptions_to_deliver(event.object.as_ref(), &event, &event.object.object_ref(), &AllowAllAuthentication, &AllowAllAuthentication).await;
        let uow = UowId::new();
        h.outbox.add_subscriptions(uow, &event, &targets);
        h.outbox.tpc_begin(uow).await.unwrap();
        h.outbox.tpc_vote(uow).await.unwrap();
        h.outbox.commit(uow).await.unwrap();
        h.outbox.tpc_finish(uow, &h.engine).await;
        h.engine.wait_for_pending_deliveries().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!sub.is_active().await, "all attempts failing at the cap deactivates the subscription");
    assert_eq!(sub.status_message().await, webhooks_core::retention::FAILURE_LIMIT_MESSAGE);
}

#[tokio::test]
async fn coalesces_identical_triples_within_one_unit_of_work() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness();
    let sub = insecure_subscription(&h.manager, format!("{}/hook", server.uri())).await;

    let event = thing_event("dup");
    let targets = vec![sub.clone()];
    let uow = UowId::new();
    // The registry scope walk can hand back the same subscription more
    // than once (e.g. via both the global and a site manager); the
    // outbox must collapse that down to one attempt.
    h.outbox.add_subscriptions(uow, &event, &targets);
    h.outbox.add_subscriptions(uow, &event, &targets);
    h.outbox.tpc_begin(uow).await.unwrap();
    assert_eq!(sub.attempt_count().await, 1, "identical triples collapse to one attempt");

    let shipment = h.outbox.tpc_vote(uow).await.unwrap();
    h.outbox.commit(uow).await.unwrap();
    h.outbox.tpc_finish(uow, &h.engine).await;
    h.engine.wait_for_pending_deliveries().await;
    assert_eq!(shipment.pairs.len(), 1);
}
