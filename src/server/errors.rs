use crate::error::Sheet2MdError;
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

/// Errors a handler can return, converted to `{"error": "..."}` responses.
#[derive(Debug)]
pub enum AppError {
    /// The request itself is unusable (no file field, bad multipart body).
    BadRequest(String),
    /// A library error; the status depends on the variant.
    Conversion(Sheet2MdError),
}

impl From<Sheet2MdError> for AppError {
    fn from(err: Sheet2MdError) -> Self {
        AppError::Conversion(err)
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(format!("Malformed multipart body: {}", err.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conversion(err) => {
                let status = match &err {
                    Sheet2MdError::InvalidDirectory { .. } | Sheet2MdError::InvalidConfig(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    Sheet2MdError::FileNotFound { .. } => StatusCode::NOT_FOUND,
                    Sheet2MdError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        if status.is_server_error() {
            error!("Request failed ({}): {}", status, message);
        } else {
            warn!("Request rejected ({}): {}", status, message);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
