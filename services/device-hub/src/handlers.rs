use std::collections::HashSet;

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::chat;
use crate::config::DuplicatePolicy;
use crate::error::HubError;
use crate::models::{
    ChatRequest, ChatResponse, DeviceListResponse, DeviceStatus, ErrorResponse, HandshakeParams,
    OutboundMessage, StatusResponse,
};
use crate::session::{DeviceSession, Handshake};
use crate::state::AppState;
use crate::store::DeviceRecord;

pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

pub async fn device_socket(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Identity is checked before the upgrade so a bad peer never reaches the registry.
    let handshake = match Handshake::from_params(params) {
        Ok(handshake) => handshake,
        Err(err) => {
            warn!(event = "handshake_rejected", error = %err);
            return err.into_response();
        }
    };

    if state.registry.policy() == DuplicatePolicy::Reject
        && state.registry.has_live(&handshake.device_id).await
    {
        let err = HubError::DuplicateDevice(handshake.device_id);
        warn!(event = "handshake_rejected", error = %err);
        return err.into_response();
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    upgrade.on_upgrade(move |socket| DeviceSession::serve(state, handshake, socket))
}

pub async fn chat(payload: Result<Json<ChatRequest>, JsonRejection>) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_json", rejection.body_text())
        }
    };

    let message = request.data.unwrap_or_default();
    if message.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "data_required",
            "Data is required".to_string(),
        );
    }

    Json(ChatResponse {
        data: chat::process_message(&message),
    })
    .into_response()
}

pub async fn list_devices(State(state): State<AppState>) -> Json<DeviceListResponse> {
    // One registry snapshot decides every device's `connected` flag.
    let connected_ids: HashSet<String> =
        state.registry.connected_ids().await.into_iter().collect();
    let records = state.store.snapshot_all().await;
    Json(DeviceListResponse {
        devices: records
            .into_iter()
            .map(|record| {
                let connected = connected_ids.contains(&record.state.device_id);
                device_status(record, connected)
            })
            .collect(),
        connected: connected_ids.len(),
    })
}

pub async fn get_device(State(state): State<AppState>, Path(device_id): Path<String>) -> Response {
    match state.store.record(&device_id).await {
        Some(record) => {
            let connected = state.registry.contains(&device_id).await;
            Json(device_status(record, connected)).into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no state recorded for {device_id}"),
        ),
    }
}

pub async fn push_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    payload: Result<Json<OutboundMessage>, JsonRejection>,
) -> Response {
    let Json(message) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_message",
                rejection.body_text(),
            )
        }
    };
    if let Err(reason) = message.validate() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_message", reason.to_string());
    }

    let kind = message.kind.clone();
    match state.registry.send(&device_id, message).await {
        Ok(()) => {
            info!(event = "push_queued", device_id = %device_id, kind = %kind);
            (StatusCode::ACCEPTED, Json(StatusResponse { status: "queued" })).into_response()
        }
        Err(source) => {
            let err = HubError::DispatchSendFailure { device_id, source };
            warn!(event = "push_failed", error = %err);
            err.into_response()
        }
    }
}

fn device_status(record: DeviceRecord, connected: bool) -> DeviceStatus {
    DeviceStatus {
        device_id: record.state.device_id,
        device_type: record.state.device_type,
        last_seen: record.state.last_seen,
        connected,
        data: record.state.data,
    }
}

fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    (status, Json(ErrorResponse { code, message })).into_response()
}
