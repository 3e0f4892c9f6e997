use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error body returned by every HTTP boundary in this crate
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable, user-facing description
    pub message: String,
    /// Structured details (offending ids, criteria) when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// RFC 3339 timestamp of when the error was produced
    pub timestamp: String,
}

/// Infrastructure and persistence failures shared by the services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Security store error: {0}")]
    SecurityStore(#[from] crate::services::security_store::SecurityStoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// The single error type raised by the checkout orchestrator.
///
/// Carries an HTTP-like status so a transport layer can map it uniformly.
/// Messages are stable and safe to show to families; internals only ever
/// travel in `details.message` for 5xx errors.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({status})")]
pub struct CheckoutError {
    pub message: String,
    pub status: StatusCode,
    pub details: Option<Value>,
}

impl CheckoutError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }
}

impl From<ServiceError> for CheckoutError {
    fn from(err: ServiceError) -> Self {
        CheckoutError::internal("Internal error while processing checkout")
            .with_details(json!({ "message": err.to_string() }))
    }
}

impl From<DbErr> for CheckoutError {
    fn from(err: DbErr) -> Self {
        ServiceError::from(err).into()
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.message,
            details: self.details,
            timestamp: Utc::now().to_rfc3339(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            other => {
                tracing::error!(error = %other, "internal service error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };
        CheckoutError::new(status, message).into_response()
    }
}
