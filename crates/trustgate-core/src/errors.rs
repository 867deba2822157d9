// ABOUTME: Unified error type, error codes and HTTP mapping for the token-trust core
// ABOUTME: Every subsystem (keys, tokens, sessions, rate limiting) reports failures through AppError
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

//! # Unified Error Handling System
//!
//! Every component of the token-trust core returns [`AppResult`]. The
//! [`ErrorCode`] carries the failure kind; its HTTP status reflects the
//! fail-open / fail-closed policy the caller is expected to apply.
//!
//! Token verification failures are deliberately coarse: callers only ever see
//! [`ErrorCode::AuthInvalid`] or [`ErrorCode::AuthExpired`], never the
//! sub-cause (unknown key id, bad signature, wrong issuer, wrong type).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the token-trust core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    // Authentication (1000-1999)
    /// No credentials were presented
    #[serde(rename = "AUTH_REQUIRED")]
    AuthRequired = 1000,
    /// Credentials or token rejected (uniform for every sub-cause)
    #[serde(rename = "AUTH_INVALID")]
    AuthInvalid = 1001,
    /// Token past its `exp` claim
    #[serde(rename = "AUTH_EXPIRED")]
    AuthExpired = 1002,
    /// `Authorization` header present but not a bearer token
    #[serde(rename = "AUTH_MALFORMED")]
    AuthMalformed = 1003,

    // Rate Limiting (2000-2999)
    /// Counter exceeded the effective limit of a policy
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded = 2000,

    // Sessions (3000-3999)
    /// Refresh flow referenced a session id that does not exist
    #[serde(rename = "SESSION_NOT_FOUND")]
    SessionNotFound = 3000,
    /// Session was explicitly revoked
    #[serde(rename = "SESSION_REVOKED")]
    SessionRevoked = 3001,
    /// Session is past its `valid_till`
    #[serde(rename = "SESSION_EXPIRED")]
    SessionExpired = 3002,

    // Signing keys (4000-4999)
    /// No key is marked active; signing fails closed
    #[serde(rename = "NO_ACTIVE_KEY")]
    NoActiveKey = 4000,
    /// Key id is not (or no longer) retained
    #[serde(rename = "KEY_NOT_FOUND")]
    KeyNotFound = 4001,
    /// Key material could not be generated, parsed or persisted
    #[serde(rename = "KEY_MATERIAL_ERROR")]
    KeyMaterialError = 4002,

    // Validation (5000-5999)
    /// Caller supplied an invalid argument
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 5000,
    /// Generic lookup miss (users and other collaborators)
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound = 5001,

    // Configuration (6000-6999)
    /// Configuration value rejected by validation
    #[serde(rename = "CONFIG_INVALID")]
    ConfigInvalid = 6000,

    // Internal / dependencies (9000-9999)
    /// Backing storage (Redis, database, key directory) failed or timed out
    #[serde(rename = "STORAGE_UNAVAILABLE")]
    StorageUnavailable = 9000,
    /// Database statement failed
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
    /// Serialization or deserialization failed
    #[serde(rename = "SERIALIZATION_ERROR")]
    SerializationError = 9002,
    /// Unclassified internal error
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9999,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,

            Self::AuthRequired
            | Self::AuthInvalid
            | Self::AuthExpired
            | Self::AuthMalformed
            | Self::SessionNotFound
            | Self::SessionRevoked
            | Self::SessionExpired
            | Self::KeyNotFound => 401,

            Self::ResourceNotFound => 404,

            Self::RateLimitExceeded => 429,

            Self::NoActiveKey | Self::StorageUnavailable => 503,

            Self::KeyMaterialError
            | Self::ConfigInvalid
            | Self::DatabaseError
            | Self::SerializationError
            | Self::InternalError => 500,
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthRequired => "Authentication is required to access this resource",
            Self::AuthInvalid => "The provided authentication credentials are invalid",
            Self::AuthExpired => "The authentication token has expired",
            Self::AuthMalformed => "The authorization header is malformed",
            Self::RateLimitExceeded => "Rate limit exceeded. Please slow down your requests",
            Self::SessionNotFound => "The session does not exist",
            Self::SessionRevoked => "The session has been revoked",
            Self::SessionExpired => "The session has expired",
            Self::NoActiveKey => "No active signing key is available",
            Self::KeyNotFound => "The signing key is not known",
            Self::KeyMaterialError => "Signing key material could not be processed",
            Self::InvalidInput => "The provided input is invalid",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::ConfigInvalid => "Configuration is invalid",
            Self::StorageUnavailable => "A storage backend is temporarily unavailable",
            Self::DatabaseError => "Database operation failed",
            Self::SerializationError => "Data serialization/deserialization failed",
            Self::InternalError => "An internal server error occurred",
        }
    }

    /// Whether the error must be reported to clients as a plain "unauthorized"
    #[must_use]
    pub const fn is_authentication_failure(self) -> bool {
        matches!(self.http_status(), 401)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Additional context that can be attached to errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Request ID for tracing
    pub request_id: Option<String>,
    /// User ID if available
    pub user_id: Option<String>,
    /// Resource ID if applicable (session id, key id, limiter key)
    pub resource_id: Option<String>,
    /// Additional key-value context
    pub details: serde_json::Value,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            request_id: None,
            user_id: None,
            resource_id: None,
            details: serde_json::Value::Null,
        }
    }
}

/// Unified error type for the token-trust core
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Additional context
    pub context: ErrorContext,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add a request ID to the error context
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.context.request_id = Some(request_id.into());
        self
    }

    /// Add a user ID to the error context
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.context.user_id = Some(user_id.into());
        self
    }

    /// Add a resource ID to the error context
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.context.resource_id = Some(resource_id.into());
        self
    }

    /// Add details to the error context
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.context.details = details;
        self
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Status code as an `http` crate type
    #[cfg(feature = "http-status")]
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        http::StatusCode::from_u16(self.http_status())
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error payload
    pub error: ErrorResponseDetails,
}

/// Body of an [`ErrorResponse`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponseDetails {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Client-facing message
    pub message: String,
    /// Request correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Structured details (rate limit hints and the like)
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub details: serde_json::Value,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        // Authentication failures collapse to the generic description so that
        // sub-causes never reach the client.
        let message = if error.code.is_authentication_failure() {
            error.code.description().to_owned()
        } else {
            error.message
        };
        Self {
            error: ErrorResponseDetails {
                code: error.code,
                message,
                request_id: error.context.request_id,
                details: error.context.details,
            },
        }
    }
}

/// Convenience functions for creating common errors
impl AppError {
    /// Authentication required
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "Authentication required")
    }

    /// Invalid token or credentials
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Token expired
    #[must_use]
    pub fn auth_expired() -> Self {
        Self::new(ErrorCode::AuthExpired, "Authentication token has expired")
    }

    /// Malformed authorization header
    pub fn auth_malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthMalformed, message)
    }

    /// Rate limit exceeded
    #[must_use]
    pub fn rate_limit_exceeded(
        limit: u64,
        reset_at: chrono::DateTime<chrono::Utc>,
        retry_after_secs: u64,
    ) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Rate limit of {limit} requests exceeded"),
        )
        .with_details(serde_json::json!({
            "limit": limit,
            "remaining": 0,
            "reset_at": reset_at.timestamp(),
            "retry_after": retry_after_secs,
        }))
    }

    /// Session missing
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self::new(ErrorCode::SessionNotFound, "Session not found").with_resource_id(session_id)
    }

    /// Session revoked
    pub fn session_revoked(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self::new(ErrorCode::SessionRevoked, "Session has been revoked")
            .with_resource_id(session_id)
    }

    /// Session expired
    pub fn session_expired(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self::new(ErrorCode::SessionExpired, "Session has expired").with_resource_id(session_id)
    }

    /// No active signing key
    #[must_use]
    pub fn no_active_key() -> Self {
        Self::new(ErrorCode::NoActiveKey, "No active signing key")
    }

    /// Key id not retained
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        let kid = kid.into();
        Self::new(ErrorCode::KeyNotFound, format!("Unknown key ID: {kid}")).with_resource_id(kid)
    }

    /// Key material failure
    pub fn key_material(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyMaterialError, message)
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    /// Storage backend failure or timeout
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageUnavailable, message)
    }

    /// Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{error:#}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::storage_unavailable(format!("I/O error: {error}")).with_source(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::AuthRequired.http_status(), 401);
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::NoActiveKey.http_status(), 503);
        assert_eq!(ErrorCode::SessionRevoked.http_status(), 401);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn test_app_error_creation() {
        let error = AppError::auth_required()
            .with_request_id("req-123")
            .with_user_id("usr_1");

        assert_eq!(error.code, ErrorCode::AuthRequired);
        assert!(error.context.request_id.is_some());
        assert!(error.context.user_id.is_some());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = AppError::rate_limit_exceeded(4, chrono::Utc::now(), 60);
        let response = ErrorResponse::from(error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("RATE_LIMIT_EXCEEDED"));
        assert!(json.contains("retry_after"));
    }

    #[test]
    fn test_auth_failures_hide_sub_cause() {
        let error = AppError::key_not_found("key_20250101_000000_000000");
        let response = ErrorResponse::from(error);

        assert!(!response.error.message.contains("key_2025"));
        assert_eq!(
            response.error.message,
            ErrorCode::KeyNotFound.description()
        );
    }
}
