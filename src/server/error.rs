use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::trust::error::TrustError;

/// Server error type that provides automatic logging and clean error responses.
///
/// This type:
/// - Automatically logs errors when converted to HTTP responses (via IntoResponse)
/// - Preserves full error chains from anyhow::Error for debugging
/// - Allows attaching structured context (role names, issuers, etc.)
/// - Returns clean, user-friendly error messages to clients
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (returned in response)
    pub message: String,
    /// Internal error with full chain (logged but not exposed to client)
    pub source: Option<anyhow::Error>,
    /// Structured context for logging (key-value pairs)
    pub context: Vec<(&'static str, String)>,
}

impl ServerError {
    /// Create a new error with just status and message (no source error)
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
            context: Vec::new(),
        }
    }

    /// Create an error from an anyhow::Error with full error chain
    pub fn from_anyhow(
        source: anyhow::Error,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            source: Some(source),
            context: Vec::new(),
        }
    }

    /// Add a context field for logging (chainable)
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Create a 500 Internal Server Error from an anyhow::Error
    pub fn internal_anyhow(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 403 Forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Log server errors (5xx) with full context using structured fields
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = ?source,
                    "Server error"
                );
            } else {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "Server error"
                );
            }
        }

        // Return clean JSON error response to client
        let body = Json(json!({
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

/// Trust failures map onto three client-visible classes: the token itself is
/// not acceptable (401), the token is fine but not trusted for the role
/// (403), or the broker cannot currently decide (503). The response body
/// carries the error's own message and nothing from the token.
impl From<TrustError> for ServerError {
    fn from(err: TrustError) -> Self {
        let status = match err {
            TrustError::InvalidSignature
            | TrustError::TokenExpired
            | TrustError::TokenNotYetValid => StatusCode::UNAUTHORIZED,
            TrustError::AudienceMismatch
            | TrustError::SubjectMismatch
            | TrustError::NoMatchingCondition => StatusCode::FORBIDDEN,
            TrustError::KeySetUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_anyhow(err, "Internal server error")
    }
}
