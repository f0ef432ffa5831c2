use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    chat, device_socket, get_device, healthz, list_devices, push_device, readyz, root,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/device", get(device_socket))
        .route("/chat", post(chat))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/:id", get(get_device))
        .route("/v1/devices/:id/push", post(push_device))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
