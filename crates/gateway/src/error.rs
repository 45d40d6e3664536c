//! HTTP mapping of registry and loop errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use capture::{SourceError, UnavailableReason};
use controller::ControllerError;
use inference::InferenceError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

fn source_status(err: &SourceError) -> StatusCode {
    match err {
        SourceError::UnknownSource(_) | SourceError::NoLocalCameras => StatusCode::NOT_FOUND,
        SourceError::InvalidLocator(_) => StatusCode::BAD_REQUEST,
        SourceError::NoActiveSource => StatusCode::CONFLICT,
        SourceError::Unavailable {
            reason: UnavailableReason::Unreachable,
            ..
        } => StatusCode::BAD_GATEWAY,
        SourceError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SourceError::Capture(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn inference_status(err: &InferenceError) -> StatusCode {
    match err {
        InferenceError::UnknownModel(_) => StatusCode::NOT_FOUND,
        InferenceError::NoModelLoaded => StatusCode::CONFLICT,
        InferenceError::ModelLoad { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InferenceError::Detection(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Source(e) => source_status(e),
            ApiError::Inference(e) => inference_status(e),
            ApiError::Controller(ControllerError::NotReady { .. })
            | ApiError::Controller(ControllerError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Controller(ControllerError::Source(e)) => source_status(e),
            ApiError::Controller(ControllerError::Inference(e)) => inference_status(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
