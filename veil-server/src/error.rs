//! HTTP mapping for request failures.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use veil_core::SyncError;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("unrecognized player: {0}")]
    UnknownUser(String),

    #[error("game not found: {0}")]
    UnknownGame(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Malformed(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnknownUser(_) => StatusCode::FORBIDDEN,
            ApiError::UnknownGame(_) => StatusCode::NOT_FOUND,
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(err) => match err {
                SyncError::UnknownSession(_) => StatusCode::NOT_FOUND,
                SyncError::UnknownActor(_) => StatusCode::FORBIDDEN,
                SyncError::UnknownAction(_)
                | SyncError::UnmappedIdentifier { .. }
                | SyncError::InvalidPatch { .. }
                | SyncError::ActionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                SyncError::DuplicateIdentifier { .. } | SyncError::SessionFaulted { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(err = %self, "request failed");
        } else {
            warn!(err = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
