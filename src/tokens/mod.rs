// ABOUTME: RS256 token issuance and verification with key-id based key resolution
// ABOUTME: Every verification failure collapses to a uniform invalid-token or expired error
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! # Token Codec
//!
//! Tokens are compact JWS (RS256). The header carries the `kid` of the signing
//! key so tokens stay verifiable after rotation, for as long as the key is
//! retained.
//!
//! Verification order: header, key lookup, signature, expiry, issuer, token
//! type. The sub-cause is logged at debug level; callers only see
//! [`ErrorCode::AuthInvalid`] or [`ErrorCode::AuthExpired`].

/// Claim types
pub mod claims;

pub use claims::{TokenClaims, TokenPayload, TokenType};

use crate::config::TrustConfig;
use crate::keys::KeyRotator;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use trustgate_core::errors::{AppError, AppResult, ErrorCode};
use uuid::Uuid;

const INVALID_TOKEN: &str = "Invalid token";

/// Signs and verifies tokens with the rotator's keys
pub struct TokenCodec {
    rotator: Arc<KeyRotator>,
    issuer: String,
    timeout: StdDuration,
}

impl TokenCodec {
    /// Create a codec for `issuer`; key lookups are bounded by `timeout`
    #[must_use]
    pub fn new(rotator: Arc<KeyRotator>, issuer: impl Into<String>, timeout: StdDuration) -> Self {
        Self {
            rotator,
            issuer: issuer.into(),
            timeout,
        }
    }

    /// Create a codec from the loaded configuration
    #[must_use]
    pub fn from_config(rotator: Arc<KeyRotator>, config: &TrustConfig) -> Self {
        Self::new(rotator, config.tokens.issuer.clone(), config.dependency_timeout)
    }

    /// Issuer written into and required from every token
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Rotator supplying the signing and verification keys
    #[must_use]
    pub const fn rotator(&self) -> &Arc<KeyRotator> {
        &self.rotator
    }

    /// Sign a token for `subject` valid for `ttl` from now
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` when no key can sign; never falls back to an unsigned token
    pub async fn issue(
        &self,
        subject: &str,
        payload: TokenPayload,
        ttl: Duration,
    ) -> AppResult<String> {
        self.issue_at(subject, payload, ttl, Utc::now()).await
    }

    /// Sign a token as of `now`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when `now + ttl` is out of range, `NoActiveKey`
    /// when no key can sign, or an internal error if encoding fails
    pub async fn issue_at(
        &self,
        subject: &str,
        payload: TokenPayload,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            AppError::invalid_input(format!("Token lifetime of {ttl} is out of range"))
        })?;

        let key = tokio::time::timeout(self.timeout, self.rotator.active_key())
            .await
            .map_err(|_| AppError::storage_unavailable("Timed out resolving the active signing key"))??;

        let claims = TokenClaims {
            sub: subject.to_owned(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            payload,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());

        let token = encode(&header, &claims, key.material().encoding_key())
            .map_err(|e| AppError::internal(format!("Failed to encode RS256 token: {e}")))?;

        tracing::debug!(
            kid = %key.kid,
            token_type = %claims.token_type(),
            sub = %claims.sub,
            "Issued token"
        );
        Ok(token)
    }

    /// Verify a token of the expected type as of now
    ///
    /// # Errors
    ///
    /// Returns `AuthExpired` for expired tokens and `AuthInvalid` for every other failure
    pub async fn verify(&self, token: &str, expected: TokenType) -> AppResult<TokenClaims> {
        self.verify_at(token, expected, Utc::now()).await
    }

    /// Verify a token of the expected type as of `now`
    ///
    /// # Errors
    ///
    /// Returns `AuthExpired` for expired tokens and `AuthInvalid` for every other failure
    pub async fn verify_at(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> AppResult<TokenClaims> {
        let header = decode_header(token).map_err(|e| rejected("malformed header", &e))?;
        if header.alg != Algorithm::RS256 {
            return Err(rejected("unexpected algorithm", &format!("{:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| rejected("missing kid", &"none"))?;

        let key = match tokio::time::timeout(self.timeout, self.rotator.key_by_id(&kid)).await {
            Ok(Ok(key)) => key,
            Ok(Err(e)) => return Err(rejected("unknown kid", &e)),
            Err(_) => {
                tracing::warn!(kid = %kid, "Key lookup timed out during verification");
                return Err(AppError::auth_invalid(INVALID_TOKEN));
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        // expiry is checked against the caller's clock below
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let claims = decode::<TokenClaims>(token, key.material().decoding_key(), &validation)
            .map_err(|e| rejected("signature or claims", &e))?
            .claims;

        if claims.exp <= now.timestamp() {
            tracing::debug!(kid = %kid, sub = %claims.sub, "Token rejected: expired");
            return Err(AppError::auth_expired());
        }
        if claims.iss != self.issuer {
            return Err(rejected("issuer mismatch", &claims.iss));
        }
        if claims.token_type() != expected {
            return Err(rejected(
                "token type mismatch",
                &format!("expected {expected}, got {}", claims.token_type()),
            ));
        }

        Ok(claims)
    }
}

/// Whether an error is one of the two verification outcomes
#[must_use]
pub const fn is_verification_failure(error: &AppError) -> bool {
    matches!(error.code, ErrorCode::AuthInvalid | ErrorCode::AuthExpired)
}

fn rejected(reason: &str, detail: &dyn std::fmt::Display) -> AppError {
    tracing::debug!(reason, detail = %detail, "Token rejected");
    AppError::auth_invalid(INVALID_TOKEN)
}
