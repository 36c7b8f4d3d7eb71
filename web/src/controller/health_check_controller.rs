use crate::controller::ApiResponse;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct HealthStatus {
    status: String,
    /// Users with at least one open event stream.
    connected_users: usize,
    /// Open event streams across all users.
    subscriptions: usize,
}

/// GET liveness plus a snapshot of the realtime broker
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "API router is up and responding to requests", body = HealthStatus),
        (status = 500, description = "Internal Server Error")
    )
)]
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    let broker = app_state.broker_ref();
    Json(ApiResponse::new(
        StatusCode::OK.into(),
        HealthStatus {
            status: "healthy".to_string(),
            connected_users: broker.connected_users(),
            subscriptions: broker.total_subscriptions(),
        },
    ))
}
