//! Structured API error responses with error codes
//!
//! Every handler error leaves the service as an [`ApiError`] carrying a stable
//! machine-readable code, so clients never parse messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::infra::RegistryError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity (1xxx)
    /// No principal id on the request
    AuthRequired,

    // Validation (3xxx)
    InvalidRequestBody,
    ValidationFailed,
    InvalidFieldValue,
    InvalidScore,
    PaymentInvalid,

    // Resources (4xxx)
    ApplicationNotFound,
    ProviderNotFound,
    CertificateNotFound,

    // Conflicts (5xxx)
    DuplicateIdentity,
    /// Ledger refused the write and its precondition does not hold
    LedgerConflict,
    AlreadyExists,

    // State (7xxx)
    InvalidStateTransition,
    /// An approval holds the application; retry once it settles
    ApprovalInFlight,

    // Infrastructure (8xxx)
    DatabaseError,
    LedgerUnavailable,
    /// The ledger write may have landed; the outcome will converge
    OutcomeUnknown,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::AuthRequired => 1001,

            ErrorCode::InvalidRequestBody => 3001,
            ErrorCode::ValidationFailed => 3002,
            ErrorCode::InvalidFieldValue => 3003,
            ErrorCode::InvalidScore => 3004,
            ErrorCode::PaymentInvalid => 3005,

            ErrorCode::ApplicationNotFound => 4001,
            ErrorCode::ProviderNotFound => 4002,
            ErrorCode::CertificateNotFound => 4003,

            ErrorCode::DuplicateIdentity => 5001,
            ErrorCode::LedgerConflict => 5002,
            ErrorCode::AlreadyExists => 5003,

            ErrorCode::InvalidStateTransition => 7001,
            ErrorCode::ApprovalInFlight => 7002,

            ErrorCode::DatabaseError => 8001,
            ErrorCode::LedgerUnavailable => 8002,
            ErrorCode::OutcomeUnknown => 8003,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,

            ErrorCode::InvalidRequestBody
            | ErrorCode::ValidationFailed
            | ErrorCode::InvalidFieldValue
            | ErrorCode::InvalidScore => StatusCode::BAD_REQUEST,
            ErrorCode::PaymentInvalid => StatusCode::PAYMENT_REQUIRED,

            ErrorCode::ApplicationNotFound
            | ErrorCode::ProviderNotFound
            | ErrorCode::CertificateNotFound => StatusCode::NOT_FOUND,

            ErrorCode::DuplicateIdentity
            | ErrorCode::LedgerConflict
            | ErrorCode::AlreadyExists
            | ErrorCode::InvalidStateTransition
            | ErrorCode::ApprovalInFlight => StatusCode::CONFLICT,

            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            // Pending, not failed: the client polls the resource later.
            ErrorCode::OutcomeUnknown => StatusCode::ACCEPTED,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::InvalidScore => "INVALID_SCORE",
            ErrorCode::PaymentInvalid => "PAYMENT_INVALID",
            ErrorCode::ApplicationNotFound => "APPLICATION_NOT_FOUND",
            ErrorCode::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorCode::CertificateNotFound => "CERTIFICATE_NOT_FOUND",
            ErrorCode::DuplicateIdentity => "DUPLICATE_IDENTITY",
            ErrorCode::LedgerConflict => "LEDGER_CONFLICT",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ApprovalInFlight => "APPROVAL_IN_FLIGHT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            ErrorCode::OutcomeUnknown => "OUTCOME_UNKNOWN",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Seconds after which a retry may succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,

    /// Related resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                retry_after: None,
                resource_id: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

// ============================================================================
// Conversion from RegistryError
// ============================================================================

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => ApiError::new(ErrorCode::ValidationFailed, msg),
            RegistryError::InvalidScore(score) => ApiError::new(
                ErrorCode::InvalidScore,
                format!("Verification score must be between 0 and 100, got {score}"),
            )
            .with_details(serde_json::json!({ "score": score })),
            RegistryError::PaymentInvalid(msg) => ApiError::new(ErrorCode::PaymentInvalid, msg),
            RegistryError::DuplicateIdentity => ApiError::new(
                ErrorCode::DuplicateIdentity,
                "An active application already exists for this identity",
            ),
            RegistryError::InvalidTransition {
                application_id,
                from,
                to,
            } => ApiError::new(
                ErrorCode::InvalidStateTransition,
                format!("Application {application_id} cannot move from {from} to {to}"),
            )
            .with_resource_id(application_id.to_string())
            .with_details(serde_json::json!({
                "from_state": from,
                "to_state": to,
            })),
            RegistryError::ApprovalInFlight(application_id) => ApiError::new(
                ErrorCode::ApprovalInFlight,
                format!("Application {application_id} has an approval in flight"),
            )
            .with_resource_id(application_id.to_string())
            .with_retry_after(30),
            RegistryError::Conflict(msg) => ApiError::new(ErrorCode::LedgerConflict, msg),
            RegistryError::UniqueViolation(constraint) => ApiError::new(
                ErrorCode::AlreadyExists,
                format!("Resource already exists ({constraint})"),
            ),
            RegistryError::ApplicationNotFound(id) => ApiError::new(
                ErrorCode::ApplicationNotFound,
                format!("Application not found: {id}"),
            )
            .with_resource_id(id.to_string()),
            RegistryError::ProviderNotFound(id) => ApiError::new(
                ErrorCode::ProviderNotFound,
                format!("No approved application for provider {id}"),
            )
            .with_resource_id(id.to_string()),
            RegistryError::CertificateNotFound(key) => ApiError::new(
                ErrorCode::CertificateNotFound,
                format!("Certificate not found: {key}"),
            )
            .with_resource_id(key),
            RegistryError::LedgerUnavailable(msg) => {
                ApiError::new(ErrorCode::LedgerUnavailable, msg).with_retry_after(30)
            }
            RegistryError::OutcomeUnknown(msg) => {
                ApiError::new(ErrorCode::OutcomeUnknown, msg).with_retry_after(60)
            }
            RegistryError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                ApiError::new(ErrorCode::DatabaseError, "Database error")
            }
            RegistryError::Configuration(msg) | RegistryError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ApiError::new(ErrorCode::InternalError, "Internal error")
            }
        }
    }
}

/// Create a validation error with field details
pub fn validation_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidFieldValue, message.into())
        .with_details(serde_json::json!({ "field": field }))
}

pub fn unauthorized(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::AuthRequired, message.into())
}
