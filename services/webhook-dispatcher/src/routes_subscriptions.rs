use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use webhooks_core::boundary::SubscriptionSnapshot;
use webhooks_core::{EventKind, PermissionId, PrincipalId, SubscriptionId, TypeTag};

use crate::state::SharedState;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub to: String,
    pub for_: String,
    pub when: Option<String>,
    pub owner_id: Option<String>,
    pub permission_id: Option<String>,
    pub dialect_id: Option<String>,
}

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub to: String,
    pub for_: String,
    pub when: String,
    pub active: bool,
    pub status_message: String,
    pub attempt_count: usize,
}

pub async fn create_subscription(
    State(state): State<SharedState>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let manager = state.registry.global();
    let sub = manager
        .create_subscription(
            req.to,
            TypeTag::owned(req.for_),
            req.when.map(EventKind::owned),
            req.owner_id.map(PrincipalId),
            req.permission_id.map(PermissionId),
            req.dialect_id,
        )
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    manager.activate_subscription(sub.id).await.map_err(internal)?;

    state
        .store
        .upsert_subscription(snapshot_of(&sub).await)
        .await
        .map_err(internal)?;

    Ok((StatusCode::CREATED, Json(to_response(&sub).await)))
}

pub async fn get_subscription(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let sub = state
        .registry
        .global()
        .get(SubscriptionId(id))
        .await
        .ok_or((StatusCode::NOT_FOUND, "subscription not found".to_string()))?;
    Ok(Json(to_response(&sub).await))
}

pub async fn deactivate_subscription(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .registry
        .global()
        .deactivate_subscription(SubscriptionId(id), "deactivated via API")
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    if let Some(sub) = state.registry.global().get(SubscriptionId(id)).await {
        state.store.upsert_subscription(snapshot_of(&sub).await).await.map_err(internal)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn to_response(sub: &webhooks_core::Subscription) -> SubscriptionResponse {
    SubscriptionResponse {
        id: sub.id.0,
        to: sub.to.clone(),
        for_: sub.for_.0.to_string(),
        when: sub.when.0.to_string(),
        active: sub.is_active().await,
        status_message: sub.status_message().await,
        attempt_count: sub.attempt_count().await,
    }
}

async fn snapshot_of(sub: &webhooks_core::Subscription) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        id: sub.id,
        for_: sub.for_.0.to_string(),
        when: sub.when.0.to_string(),
        to: sub.to.clone(),
        owner_id: sub.owner_id.as_ref().map(|p| p.0.clone()),
        permission_id: sub.permission_id.as_ref().map(|p| p.0.clone()),
        dialect_id: sub.dialect_id.clone(),
        active: sub.is_active().await,
        status_message: sub.status_message().await,
        attempt_limit: sub.attempt_limit().await,
        applicable_precondition_failure_limit: sub.applicable_precondition_failure_limit().await,
        created_time: sub.created_time,
        modified_time: sub.modified_time().await,
    }
}
