// ABOUTME: Typed JWT claims with a closed tagged union of token kinds
// ABOUTME: Each token_type carries exactly the fields its flow needs
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a token, as carried in the `token_type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived API access
    Access,
    /// Long-lived credential exchanged for access tokens
    Refresh,
    /// Proves control of an email address
    EmailVerification,
    /// Authorises a single password reset
    PasswordReset,
}

impl TokenType {
    /// Wire name of the token type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific claims, tagged by `token_type`
///
/// Decoding fails when a variant's required fields are missing, so a
/// refresh token without `session_id` never reaches application code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "token_type", rename_all = "snake_case")]
pub enum TokenPayload {
    /// Access token, optionally bound to the session it was minted from
    Access {
        /// Session that issued this token
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Refresh token anchored to a revocable session
    Refresh {
        /// Backing session
        session_id: String,
    },
    /// Email verification link token
    EmailVerification {
        /// Address being verified
        email: String,
    },
    /// Password reset link token
    PasswordReset {
        /// Account email
        email: String,
    },
}

impl TokenPayload {
    /// Kind of this payload
    #[must_use]
    pub const fn token_type(&self) -> TokenType {
        match self {
            Self::Access { .. } => TokenType::Access,
            Self::Refresh { .. } => TokenType::Refresh,
            Self::EmailVerification { .. } => TokenType::EmailVerification,
            Self::PasswordReset { .. } => TokenType::PasswordReset,
        }
    }

    /// Session id for access and refresh tokens
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Access { session_id } => session_id.as_deref(),
            Self::Refresh { session_id } => Some(session_id),
            Self::EmailVerification { .. } | Self::PasswordReset { .. } => None,
        }
    }

    /// Email for verification and reset tokens
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::EmailVerification { email } | Self::PasswordReset { email } => Some(email),
            Self::Access { .. } | Self::Refresh { .. } => None,
        }
    }
}

/// Full claim set of a signed token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user id)
    pub sub: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Unique token id
    pub jti: String,
    /// Type-specific claims
    #[serde(flatten)]
    pub payload: TokenPayload,
}

impl TokenClaims {
    /// Kind of this token
    #[must_use]
    pub const fn token_type(&self) -> TokenType {
        self.payload.token_type()
    }
}
