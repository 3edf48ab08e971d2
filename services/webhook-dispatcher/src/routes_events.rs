use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use webhooks_core::{DomainObject, EventKind, ObjectEvent, UowId};

use crate::auth::OpenAuthentication;
use crate::domain::GenericRecord;
use crate::state::SharedState;

type ApiError = (StatusCode, String);

/// A domain event posted by some other part of the host application:
/// "this object, of this type, underwent this kind of change, here's
/// its current body." The dispatcher runs it through the full
/// accumulate -> vote -> commit -> finish pipeline and fires off
/// whatever deliveries result (spec §4.7, §4.8).
#[derive(Deserialize)]
pub struct PublishEventRequest {
    pub object_id: String,
    pub type_tag: String,
    pub event_kind: Option<String>,
    pub owner_id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
pub struct PublishEventResponse {
    pub matched_subscriptions: usize,
    pub attempts_created: usize,
}

pub async fn publish_event(
    State(state): State<SharedState>,
    Json(req): Json<PublishEventRequest>,
) -> Result<Json<PublishEventResponse>, ApiError> {
    let object = Arc::new(GenericRecord {
        object_id: req.object_id,
        type_tag: req.type_tag,
        owner: req.owner_id,
    });
    state.externalizer.stage(object.object_ref(), req.payload);

    let kind = req.event_kind.map(EventKind::owned).unwrap_or_default();
    let event = ObjectEvent::new(kind, object.clone());
    let object_ref = object.object_ref();

    let auth = OpenAuthentication;
    let targets = state
        .registry
        .subscriptions_to_deliver(object.as_ref(), &event, &object_ref, &auth, &auth)
        .await;
    let matched_subscriptions = targets.len();

    let uow = UowId::new();
    state.outbox.add_subscriptions(uow, &event, &targets);
    state
        .outbox
        .tpc_begin(uow)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let shipment = state
        .outbox
        .tpc_vote(uow)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let attempts_created = shipment.pairs.len();
    state
        .outbox
        .commit(uow)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state.outbox.tpc_finish(uow, &state.engine).await;

    Ok(Json(PublishEventResponse { matched_subscriptions, attempts_created }))
}
