use crate::relay::RelayError;
use crate::storage::StorageError;
use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Body returned for every failure past the upload stage.
pub const GENERIC_ERROR: &str = "Failed to process submission";

/// Submission errors with their HTTP status codes
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Expected a multipart/form-data body: {0}")]
    NotMultipart(#[from] MultipartRejection),

    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Only one Product_Image file is accepted")]
    DuplicateFile,

    #[error("File exceeds the maximum size of {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl SubmitError {
    pub fn to_err_code(&self) -> StatusCode {
        match self {
            SubmitError::NotMultipart(rejection) => rejection.status(),
            SubmitError::Multipart(error) => error.status(),
            SubmitError::MissingField(_) | SubmitError::DuplicateFile => StatusCode::BAD_REQUEST,
            SubmitError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SubmitError::Storage(_) | SubmitError::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let status = self.to_err_code();
        // Server-side failures never leak details to the client
        let message = if status.is_server_error() {
            GENERIC_ERROR.to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
