//! Error taxonomy surfaced by the hub services and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use taskhub_proto::share::ShareDenial;

use crate::store::StoreError;

/// Errors returned by task, share and reminder operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HubError {
    /// The task, comment, file or share token does not exist (in the caller's scope).
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid tenant/user identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is acting outside their rights.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The share link's expiry has passed.
    #[error("share link has expired")]
    Expired,

    /// The share link's view cap has been reached.
    #[error("share link view limit reached")]
    ViewLimitReached,

    /// A request field failed validation. Only the first failing field is reported.
    #[error("validation failed on {field}: {message}")]
    ValidationFailed {
        /// Wire name of the failing field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Concurrent modification conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The task store backend failed.
    #[error("store error: {0}")]
    Store(String),
}

impl HubError {
    /// Shorthand for a [`HubError::ValidationFailed`].
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, used as `errorType` in responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Expired => "expired",
            Self::ViewLimitReached => "view_limit_reached",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "store_error",
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::ViewLimitReached => StatusCode::FORBIDDEN,
            Self::Expired => StatusCode::GONE,
            Self::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("task {id}")),
            StoreError::DuplicateShareToken => Self::Conflict(err.to_string()),
            StoreError::Backend(_) => Self::Store(err.to_string()),
        }
    }
}

impl From<ShareDenial> for HubError {
    fn from(denial: ShareDenial) -> Self {
        match denial {
            ShareDenial::NotShared => Self::NotFound("share link".to_string()),
            ShareDenial::Expired => Self::Expired,
            ShareDenial::ViewLimitReached => Self::ViewLimitReached,
        }
    }
}

/// JSON body of an error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let field = match &self {
            Self::ValidationFailed { field, .. } => Some(*field),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            error_type: self.kind(),
            field,
        };
        (status, Json(body)).into_response()
    }
}
