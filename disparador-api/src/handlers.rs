use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use disparador_dispatch::{
    Actor, CreateDispatch, DashboardView, DispatchService, StatusAck, StatusReport,
};
use serde::Deserialize;
use serde_json::json;
use tracing;
use uuid::Uuid;

use crate::errors::ApiError;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "disparador-api"
    }))
}

pub async fn create_dispatch(
    Extension(service): Extension<DispatchService>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateDispatch>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let dispatch_id = service.create_dispatch(&actor, request).await?;
    tracing::info!("User {} started dispatch {}", actor.user_id, dispatch_id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "dispatchId": dispatch_id })),
    ))
}

pub async fn get_dispatch(
    Extension(service): Extension<DispatchService>,
    Extension(actor): Extension<Actor>,
    Path(dispatch_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (dispatch, contacts) = service.dispatch_detail(&actor, dispatch_id).await?;

    Ok(Json(json!({
        "dispatch": dispatch,
        "contacts": contacts,
    })))
}

pub async fn delete_dispatch(
    Extension(service): Extension<DispatchService>,
    Extension(actor): Extension<Actor>,
    Path(dispatch_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = service.delete_dispatch(&actor, dispatch_id).await?;

    Ok(Json(json!({
        "status": "ok",
        "deletedContacts": removed,
    })))
}

/// Delivery callback from the relay. The caller was resolved from `x-unique-id`.
pub async fn update_contact_status(
    Extension(service): Extension<DispatchService>,
    Extension(actor): Extension<Actor>,
    Json(report): Json<StatusReport>,
) -> Result<Json<StatusAck>, ApiError> {
    let ack = service.update_contact_status(&actor, report).await?;
    Ok(Json(ack))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    #[serde(default)]
    pub selected_user_id: Option<Uuid>,
}

pub async fn dashboard(
    Extension(service): Extension<DispatchService>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<DashboardQuery>,
) -> Result<Json<DashboardView>, ApiError> {
    let view = service.dashboard(&actor, params.selected_user_id).await?;
    Ok(Json(view))
}
