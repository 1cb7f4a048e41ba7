//! Error Types for the Greenbed service layer
//!
//! Every service operation returns `ApiResult<T>`. Lower-layer errors are
//! folded into `ApiError` through the `From` impls at the bottom of this
//! file, so services can use `?` on store, mapper, cache and limiter calls.
//!
//! Store failures are logged in full and surfaced with a generic message so
//! SQL and file paths never reach a client.

use std::fmt;

use greenbed_core::{
    CacheError, ConfigError, GreenbedError, RateLimitError, StoreError, ValidationError,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error categories, each mapped to an HTTP status for whichever transport
/// sits in front of the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// Request has no authenticated subject
    Unauthorized,

    /// Subject is known but may not perform the operation
    Forbidden,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field value is out of valid range
    InvalidRange,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist or belongs to someone else
    EntityNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Entity with the same unique value already exists
    EntityAlreadyExists,

    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Throttling (429)
    // ========================================================================
    /// Request rate limit exceeded
    TooManyRequests,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Store is busy or locked
    ServiceUnavailable,
}

impl ErrorCode {
    /// HTTP status code for this error code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidRange => 400,

            ErrorCode::EntityNotFound => 404,

            ErrorCode::EntityAlreadyExists | ErrorCode::StateConflict => 409,

            ErrorCode::TooManyRequests => 429,

            ErrorCode::ServiceUnavailable => 503,

            ErrorCode::InternalError | ErrorCode::DatabaseError => 500,
        }
    }

    /// Default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::EntityAlreadyExists => "Entity already exists",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::TooManyRequests => "Rate limit exceeded",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }

    /// Whether the client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::TooManyRequests | ErrorCode::ServiceUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error returned by every service operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending field, limits, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Seconds until a throttled request may be retried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("Field '{}' must be between {} and {}", field, min, max),
        )
        .with_details(serde_json::json!({ "field": field }))
    }

    /// Create an EntityNotFound error.
    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn entity_already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityAlreadyExists, message)
    }

    /// Create a StateConflict error.
    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Create a TooManyRequests error.
    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Rate limit exceeded. Retry after {} seconds", secs),
            None => "Rate limit exceeded".to_string(),
        };
        Self {
            retry_after_secs,
            ..Self::new(ErrorCode::TooManyRequests, message)
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// CONVERSIONS FROM LOWER LAYERS
// ============================================================================

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy { .. } => {
                tracing::warn!(error = %err, "Store busy");
                ApiError::service_unavailable("The database is busy, try again shortly")
            }
            StoreError::ConstraintViolation { .. } => {
                tracing::warn!(error = %err, "Constraint violation");
                ApiError::state_conflict("The change conflicts with existing data")
            }
            _ => {
                // Log the full error for debugging
                tracing::error!(error = %err, "Store error");

                // Return a generic database error to avoid leaking internal details
                ApiError::database_error("Database operation failed")
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(field),
            ValidationError::OutOfRange {
                field, min, max, ..
            } => ApiError::invalid_range(field, min, max),
            ValidationError::InvalidValue { field, .. }
            | ValidationError::ImmutableField { field } => {
                ApiError::validation_failed(err.to_string())
                    .with_details(serde_json::json!({ "field": field }))
            }
            ValidationError::UnknownColumn { column, .. } => {
                ApiError::validation_failed(err.to_string())
                    .with_details(serde_json::json!({ "field": column }))
            }
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidArgument { reason } => ApiError::invalid_input(reason),
            other => {
                tracing::error!(error = %other, "Cache error");
                ApiError::internal_error("Cache operation failed")
            }
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::InvalidArgument { reason } => ApiError::invalid_input(reason),
            RateLimitError::Store(store) => store.into(),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Invalid configuration: {}", err))
    }
}

impl From<GreenbedError> for ApiError {
    fn from(err: GreenbedError) -> Self {
        match err {
            GreenbedError::Store(e) => e.into(),
            GreenbedError::Validation(e) => e.into(),
            GreenbedError::Cache(e) => e.into(),
            GreenbedError::RateLimit(e) => e.into(),
            GreenbedError::Config(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for service operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), 401);
        assert_eq!(ErrorCode::ValidationFailed.status_code(), 400);
        assert_eq!(ErrorCode::EntityNotFound.status_code(), 404);
        assert_eq!(ErrorCode::StateConflict.status_code(), 409);
        assert_eq!(ErrorCode::TooManyRequests.status_code(), 429);
        assert_eq!(ErrorCode::DatabaseError.status_code(), 500);
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), 503);
    }

    #[test]
    fn test_too_many_requests_carries_retry_after() {
        let err = ApiError::too_many_requests(Some(42));
        assert_eq!(err.code, ErrorCode::TooManyRequests);
        assert_eq!(err.retry_after_secs, Some(42));
        assert!(err.message.contains("42"));
        assert!(err.code.is_retryable());
    }

    #[test]
    fn test_store_errors_hide_details() {
        let err: ApiError = StoreError::Query {
            reason: "near \"SELEC\": syntax error".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("SELEC"));

        let err: ApiError = StoreError::Busy {
            reason: "database is locked".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn test_validation_errors_map_to_400() {
        let err: ApiError = GreenbedError::from(ValidationError::OutOfRange {
            field: "update_interval".to_string(),
            value: "5".to_string(),
            min: "60".to_string(),
            max: "3600".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::InvalidRange);
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.details,
            Some(serde_json::json!({ "field": "update_interval" }))
        );
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::unauthorized("Missing session");
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("UNAUTHORIZED"));
        assert!(!json.contains("retry_after_secs"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }
}
