//! The HTTP boundary's error shape. Internal provider/store/orchestrator
//! errors are mapped here rather than leaked to clients untyped (§7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Carries the status alongside the message so handlers can build it with
/// `?` from any source error and a chosen status code.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<beamforge_core::domain::ParamsError> for ApiError {
    fn from(err: beamforge_core::domain::ParamsError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<beamforge_store::StoreError> for ApiError {
    fn from(err: beamforge_store::StoreError) -> Self {
        match err {
            beamforge_store::StoreError::SessionNotFound(_)
            | beamforge_store::StoreError::ImageNotFound(..) => ApiError::not_found(err.to_string()),
            beamforge_store::StoreError::InvalidPath { .. } => {
                ApiError::bad_request(err.to_string())
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<beamforge_supervisor::SupervisorError> for ApiError {
    fn from(err: beamforge_supervisor::SupervisorError) -> Self {
        use beamforge_supervisor::SupervisorError::*;
        match err {
            AlreadyRunning(_) => ApiError::conflict(err.to_string()),
            StopLocked(_) => ApiError::conflict(format!("{err} (STOP_LOCK present)")),
            PortOccupied { .. } | InvalidEncoderPaths(_) => ApiError::bad_request(err.to_string()),
            NotConfigured(..) => ApiError::service_unavailable(err.to_string()),
            Io(_) => ApiError::internal(err.to_string()),
        }
    }
}
