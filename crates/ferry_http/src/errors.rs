use axum::extract::multipart::MultipartError;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use thiserror;

use ferry_core::Error as CoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("multipart error: {0}")]
    MultipartError(#[from] MultipartError),

    #[error("missing form field: {0}")]
    MissingFormField(&'static str),

    #[error("missing object name")]
    MissingObjectName,

    #[error("upload exceeds the maximum size of {max} bytes")]
    FileTooLarge { max: u64 },

    #[error("an upload of {0} is already in progress")]
    UploadInProgress(String),

    #[error("no active upload of {0}")]
    UploadUnknown(String),

    #[error("ferry error: {0}")]
    FerryCoreError(#[from] CoreError),

    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("upload task failed: {0}")]
    TokioJoinError(#[from] tokio::task::JoinError),
}

/// Error responses carry a short generic message; the details only go to the log.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::MultipartError(ref e) => {
                tracing::warn!("malformed upload request: {e}");
                into_error_response(StatusCode::BAD_REQUEST, "Malformed upload request.")
            }
            Error::MissingFormField(_) | Error::MissingObjectName => {
                tracing::warn!("{self}");
                into_error_response(StatusCode::BAD_REQUEST, "Malformed upload request.")
            }
            Error::FileTooLarge { .. } => {
                tracing::warn!("{self}");
                into_error_response(StatusCode::PAYLOAD_TOO_LARGE, "File too large.")
            }
            Error::UploadInProgress(_) => {
                tracing::warn!("{self}");
                into_error_response(StatusCode::CONFLICT, "Upload already in progress.")
            }
            Error::UploadUnknown(_) => {
                into_error_response(StatusCode::NOT_FOUND, "No upload in progress.")
            }
            Error::FerryCoreError(e) => core_error_to_response(e),
            Error::IOError(_) | Error::TokioJoinError(_) => {
                tracing::error!("failed to upload file: {self}");
                into_error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload file.")
            }
        }
    }
}

#[inline]
fn into_error_response(status_code: StatusCode, message: &str) -> Response {
    (status_code, axum::Json(json!({ "message": message }))).into_response()
}

#[inline]
fn core_error_to_response(e: CoreError) -> Response {
    match e {
        CoreError::Validation(_) => {
            tracing::warn!("rejected upload: {e}");
            into_error_response(StatusCode::BAD_REQUEST, "Invalid upload request.")
        }
        CoreError::FileTooLarge { .. } => {
            tracing::warn!("rejected upload: {e}");
            into_error_response(StatusCode::PAYLOAD_TOO_LARGE, "File too large.")
        }
        CoreError::Cancelled { .. } => {
            tracing::warn!("{e}");
            into_error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Upload interrupted, please retry.",
            )
        }
        CoreError::Upload(_) | CoreError::Io(_) => {
            tracing::error!("failed to upload file: {e:?}");
            into_error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload file.")
        }
    }
}
