use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use disparador_core::DispatchError;
use serde_json::json;
use tracing;

/// Turns a dispatch failure into the message the user sees. Nothing is retried.
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match self.0 {
            DispatchError::Validation(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": message,
                    "violations": violations
                        .iter()
                        .map(|v| {
                            let mut entry = serde_json::to_value(v).unwrap_or_else(|_| json!({}));
                            entry["message"] = json!(v.to_string());
                            entry
                        })
                        .collect::<Vec<_>>(),
                }),
            ),
            DispatchError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            DispatchError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, json!({ "error": message })),
            DispatchError::Upstream { dispatch_id, .. } => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": message,
                    "dispatchId": dispatch_id,
                    "started": true,
                }),
            ),
            DispatchError::TransientStore(_) => {
                tracing::error!("Store failure surfaced to client: {}", message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "service temporarily unavailable, please try again" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
