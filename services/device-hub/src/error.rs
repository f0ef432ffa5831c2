use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::models::ErrorResponse;

/// Why an outbound message could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("device is not connected")]
    NotConnected,

    #[error("connection writer has shut down")]
    Closed,

    #[error("outbound buffer is full")]
    Full,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("bad handshake: {0}")]
    BadHandshake(String),

    #[error("device {0} is already connected")]
    DuplicateDevice(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("dispatch to {device_id} failed: {source}")]
    DispatchSendFailure {
        device_id: String,
        #[source]
        source: SendError,
    },
}

impl HubError {
    pub fn code(&self) -> &'static str {
        match self {
            HubError::BadHandshake(_) => "bad_handshake",
            HubError::DuplicateDevice(_) => "duplicate_device",
            HubError::MalformedFrame(_) => "malformed_frame",
            HubError::TransportFailure(_) => "transport_failure",
            HubError::DispatchSendFailure { source, .. } => match source {
                SendError::NotConnected => "not_connected",
                SendError::Closed | SendError::Full => "send_failed",
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HubError::BadHandshake(_) | HubError::MalformedFrame(_) => StatusCode::BAD_REQUEST,
            HubError::DuplicateDevice(_) => StatusCode::CONFLICT,
            HubError::TransportFailure(_) => StatusCode::BAD_GATEWAY,
            HubError::DispatchSendFailure { source, .. } => match source {
                SendError::NotConnected => StatusCode::NOT_FOUND,
                SendError::Closed | SendError::Full => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_failures_map_to_http_status() {
        let missing = HubError::DispatchSendFailure {
            device_id: "tv".to_string(),
            source: SendError::NotConnected,
        };
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.code(), "not_connected");

        let full = HubError::DispatchSendFailure {
            device_id: "tv".to_string(),
            source: SendError::Full,
        };
        assert_eq!(full.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(full.to_string(), "dispatch to tv failed: outbound buffer is full");
    }

    #[test]
    fn handshake_errors_are_client_errors() {
        let err = HubError::BadHandshake("device_id is required".to_string());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "bad_handshake");
    }
}
