//! API error type and its JSON rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tally_store::StoreError;
use tracing::error;

/// Every failure an API handler can return.
///
/// Rendered as `{ "success": false, "error": { "code", "message" } }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Name is required")]
    MissingName,
    #[error("Name must be a string")]
    InvalidNameType,
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Name must be {max} characters or less")]
    NameTooLong { max: usize },
    #[error("{0}")]
    InvalidInput(String),
    #[error("Valid session required to vote")]
    Unauthorized,
    #[error("You have already voted in this session")]
    DuplicateVote,
    #[error("Selected voting option does not exist")]
    InvalidOption,
    #[error("Failed to create user session")]
    SessionCreationFailed(#[source] StoreError),
    #[error("{context}")]
    Database {
        context: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{method} method not allowed for this endpoint")]
    MethodNotAllowed { method: String },
    #[error("An unexpected error occurred")]
    Internal(String),
}

impl ApiError {
    pub fn database(context: &'static str, source: StoreError) -> Self {
        Self::Database { context, source }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingName => "MISSING_NAME",
            Self::InvalidNameType => "INVALID_NAME_TYPE",
            Self::EmptyName => "EMPTY_NAME",
            Self::NameTooLong { .. } => "NAME_TOO_LONG",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::DuplicateVote => "DUPLICATE_VOTE",
            Self::InvalidOption => "INVALID_OPTION",
            Self::SessionCreationFailed(_) => "SESSION_CREATION_FAILED",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingName
            | Self::InvalidNameType
            | Self::EmptyName
            | Self::NameTooLong { .. }
            | Self::InvalidInput(_)
            | Self::InvalidOption => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::DuplicateVote => StatusCode::CONFLICT,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::SessionCreationFailed(_) | Self::Database { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            let cause = match &self {
                Self::SessionCreationFailed(e) | Self::Database { source: e, .. } => e.to_string(),
                Self::Internal(detail) => detail.clone(),
                _ => String::new(),
            };
            error!(code = self.code(), %cause, "request failed");
        }
        let body = json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
