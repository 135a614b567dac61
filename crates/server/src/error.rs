// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use harvest_server_jobs::JobError;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

use crate::results::ResultStoreError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/client/src/types/generated/"))]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Result store error: {0}")]
    ResultStore(#[from] ResultStoreError),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(JobError::Validation(msg)) => {
                tracing::warn!(message = %msg, "Invalid crawl submission");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone()))
            }
            ApiError::Job(JobError::NotFound(id)) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
            ApiError::JobNotFound(raw) => {
                tracing::warn!(job_id = %raw, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", raw)),
                )
            }
            ApiError::ResultStore(store_err) => {
                let (status, error_msg) = match store_err {
                    ResultStoreError::InvalidFilename(name) => {
                        tracing::warn!(filename = %name, "Rejected artifact filename");
                        (StatusCode::BAD_REQUEST, "Invalid filename")
                    }
                    ResultStoreError::NotFound(name) => {
                        tracing::warn!(filename = %name, "Artifact not found");
                        (StatusCode::NOT_FOUND, "File not found")
                    }
                    ResultStoreError::UnsupportedFormat(name) => {
                        tracing::warn!(filename = %name, "Unsupported artifact format");
                        (StatusCode::BAD_REQUEST, "Unsupported file format")
                    }
                    ResultStoreError::Io { filename, source } => {
                        tracing::error!(filename = %filename, error = %source, "IO error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "IO error accessing file")
                    }
                    ResultStoreError::Decode { filename, source } => {
                        tracing::error!(filename = %filename, error = %source, "Artifact decode failed");
                        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to decode file")
                    }
                };
                (
                    status,
                    ErrorResponse::with_details(error_msg, store_err.to_string()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
