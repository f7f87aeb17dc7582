use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{request_tracing, ServerState};

use super::handlers::{devices, status_ws};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(|| async { "Device monitor" }))
            .route("/ws/devices", get(status_ws::handler_device_status_ws))
            .nest(
                "/api/devices",
                Router::new()
                    .route("/", get(devices::handler_list_devices))
                    .route("/status", get(devices::handler_device_statuses))
                    .route("/:id", get(devices::handler_get_device))
                    .route("/:id/status", get(devices::handler_check_device_status))
                    .route("/:id/command", post(devices::handler_send_command)),
            )
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(cors_layer)
            .with_state(state)
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
