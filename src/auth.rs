// ABOUTME: Authentication flows tying keys, tokens, sessions and rate limits together
// ABOUTME: Login, refresh, bearer authentication, logout and email/password-reset tokens
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Authentication Service
//!
//! [`AuthService`] is the surface an HTTP layer calls. It owns no state of its
//! own: keys live in the [`KeyRotator`], sessions in the [`SessionLedger`] and
//! counters in the [`RateLimiter`]. User records are read through the
//! [`UserDirectory`] trait; creating or editing users is the caller's job.
//!
//! Refresh tokens embed their session id. The session stores only the SHA-256
//! of the token, so a leaked session row cannot be replayed as a token.

// NOTE: `.clone()` calls in this file copy ids and claims into owned responses
// or share `Arc` handles between tasks.

use crate::config::{TokenConfig, TrustConfig};
use crate::keys::{KeyRotator, KeyStore, RotationPolicy};
use crate::logging::AppLogger;
use crate::rate_limiting::{PolicyKind, RateLimiter};
use crate::sessions::{
    connect_store, generate_session_id, hash_refresh_token, SessionLedger, SessionMetadata,
};
use crate::tokens::{TokenClaims, TokenCodec, TokenPayload, TokenType};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use trustgate_core::constants::tokens::BEARER_PREFIX;
use trustgate_core::errors::{AppError, AppResult};

/// Route names used as the last segment of rate limit keys
pub mod routes {
    /// Password login
    pub const LOGIN: &str = "/auth/login";
    /// Access token refresh
    pub const REFRESH: &str = "/auth/refresh";
    /// Password reset request
    pub const PASSWORD_RESET: &str = "/auth/password-reset";
}

/// User fields the token flows depend on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user id, written as `sub`
    pub id: String,
    /// Login email
    pub email: String,
    /// Account is enabled
    pub is_active: bool,
    /// Email ownership confirmed
    pub email_verified: bool,
}

impl UserRecord {
    /// Active, verified user
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            is_active: true,
            email_verified: true,
        }
    }
}

/// Read access to user accounts
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id
    async fn find_user(&self, user_id: &str) -> AppResult<Option<UserRecord>>;

    /// Look up a user by email
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<UserRecord>>;
}

/// User directory held in memory
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user
    pub async fn upsert(&self, user: UserRecord) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    /// Enable or disable a user; returns false for unknown ids
    pub async fn set_active(&self, user_id: &str, is_active: bool) -> bool {
        self.users
            .write()
            .await
            .get_mut(user_id)
            .map(|user| user.is_active = is_active)
            .is_some()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: &str) -> AppResult<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

/// Tokens returned by a login
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    /// Short-lived bearer token
    pub access_token: String,
    /// Long-lived token bound to `session_id`
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Session backing the refresh token
    pub session_id: String,
    /// Authenticated user
    pub user_id: String,
}

/// Access token returned by a refresh
#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    /// Short-lived bearer token
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Extract the token from an `Authorization: Bearer <token>` header value
///
/// # Errors
///
/// Returns `AuthRequired` when the header is absent and `AuthMalformed` when
/// the scheme is wrong or the token is empty
pub fn extract_bearer_token(header: Option<&str>) -> AppResult<&str> {
    let header = header.ok_or_else(AppError::auth_required)?;
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| AppError::auth_malformed("Authorization header must use the Bearer scheme"))?
        .trim();
    if token.is_empty() {
        return Err(AppError::auth_malformed("Bearer token is empty"));
    }
    Ok(token)
}

fn ensure_can_authenticate(user: &UserRecord) -> AppResult<()> {
    if !user.is_active {
        return Err(AppError::auth_invalid("Account is not active"));
    }
    if !user.email_verified {
        return Err(AppError::auth_invalid("Email address is not verified"));
    }
    Ok(())
}

/// Authentication flows over the token-trust components
#[derive(Clone)]
pub struct AuthService {
    codec: Arc<TokenCodec>,
    ledger: SessionLedger,
    limiter: RateLimiter,
    users: Arc<dyn UserDirectory>,
    tokens: TokenConfig,
}

impl AuthService {
    /// Assemble a service from already-built components
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        ledger: SessionLedger,
        limiter: RateLimiter,
        users: Arc<dyn UserDirectory>,
        tokens: TokenConfig,
    ) -> Self {
        Self {
            codec,
            ledger,
            limiter,
            users,
            tokens,
        }
    }

    /// Build every component from configuration
    ///
    /// Opens the key directory (minting a first key if it is empty), connects
    /// the session database and picks the rate limit backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the key directory or session database cannot be opened
    pub async fn from_config(
        config: &TrustConfig,
        users: Arc<dyn UserDirectory>,
    ) -> AppResult<Self> {
        let store = Arc::new(KeyStore::open(config.keys.dir.clone()).await?);
        let rotator = Arc::new(KeyRotator::new(store, RotationPolicy::from_config(config)));
        rotator.ensure_active_key().await?;

        let session_store = connect_store(&config.sessions.database_url).await?;
        let ledger = SessionLedger::new(session_store, config.dependency_timeout);
        let limiter = RateLimiter::from_config(config).await;
        let codec = Arc::new(TokenCodec::from_config(rotator, config));

        Ok(Self::new(
            codec,
            ledger,
            limiter,
            users,
            config.tokens.clone(),
        ))
    }

    /// Token codec
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Session ledger
    #[must_use]
    pub const fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Rate limiter
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Log a user in behind the login rate limit
    ///
    /// `check_credentials` verifies the secret and returns the user; only its
    /// failures count against the login policy.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the client is over the limit, the
    /// credential check's error, `AuthInvalid` for inactive or unverified
    /// users, or the error of issuing the session
    pub async fn login<F, Fut>(
        &self,
        client: &str,
        metadata: SessionMetadata,
        check_credentials: F,
    ) -> AppResult<TokenPair>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<UserRecord>> + Send,
    {
        let result = self
            .limiter
            .guard(PolicyKind::Login, client, routes::LOGIN, || async move {
                let user = check_credentials().await?;
                ensure_can_authenticate(&user)?;
                self.issue_session(&user, metadata).await
            })
            .await;

        match &result {
            Ok(pair) => {
                AppLogger::log_auth_event(&pair.user_id, "login", true, None);
            }
            Err(e) => {
                AppLogger::log_auth_event(client, "login", false, Some(&e.message));
            }
        }
        result
    }

    /// Open a session for an authenticated user and issue its tokens
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` when no key can sign or `StorageUnavailable` when
    /// the session cannot be stored
    pub async fn issue_session(
        &self,
        user: &UserRecord,
        metadata: SessionMetadata,
    ) -> AppResult<TokenPair> {
        let session_id = generate_session_id();
        let now = Utc::now();

        let refresh_token = self
            .codec
            .issue_at(
                &user.id,
                TokenPayload::Refresh {
                    session_id: session_id.clone(),
                },
                self.tokens.refresh_token_ttl,
                now,
            )
            .await?;

        self.ledger
            .create_at(
                &session_id,
                &user.id,
                &hash_refresh_token(&refresh_token),
                metadata,
                self.tokens.refresh_token_ttl,
                now,
            )
            .await?;

        let access_token = self
            .codec
            .issue_at(
                &user.id,
                TokenPayload::Access {
                    session_id: Some(session_id.clone()),
                },
                self.tokens.access_token_ttl,
                now,
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.tokens.access_token_ttl.num_seconds(),
            session_id,
            user_id: user.id.clone(),
        })
    }

    /// Exchange a refresh token for a new access token
    ///
    /// A `device_fingerprint` that differs from the one recorded at login
    /// rejects the refresh. A fingerprint presented for a session that has
    /// none recorded is allowed and logged.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded`, a verification error for bad tokens, a
    /// session error for unusable sessions, or `AuthInvalid` for a fingerprint
    /// mismatch or an unknown or inactive user
    pub async fn refresh(
        &self,
        client: &str,
        refresh_token: &str,
        device_fingerprint: Option<&str>,
    ) -> AppResult<AccessGrant> {
        self.limiter
            .check(PolicyKind::Refresh, client, routes::REFRESH)
            .await
            .into_result()?;

        let claims = self.codec.verify(refresh_token, TokenType::Refresh).await?;
        let session_id = claims
            .payload
            .session_id()
            .ok_or_else(|| AppError::auth_invalid("Invalid token"))?
            .to_owned();

        let session = self
            .ledger
            .resolve_for_refresh(&session_id, &hash_refresh_token(refresh_token))
            .await?;
        if session.user_id != claims.sub {
            tracing::warn!(session_id = %session_id, "Refresh token subject does not own the session");
            return Err(AppError::auth_invalid("Invalid token"));
        }

        match (
            device_fingerprint.filter(|f| !f.is_empty()),
            session.metadata.device_fingerprint.as_str(),
        ) {
            (Some(presented), stored) if !stored.is_empty() && presented != stored => {
                AppLogger::log_security_event(
                    "device_fingerprint_mismatch",
                    "warn",
                    &format!("session {session_id} refreshed from a different device"),
                    Some(&session.user_id),
                );
                return Err(AppError::auth_invalid("Invalid token"));
            }
            (Some(_), "") => {
                tracing::warn!(
                    session_id = %session_id,
                    user_id = %session.user_id,
                    "Device fingerprint presented for a session without one"
                );
            }
            _ => {}
        }

        let user = self
            .users
            .find_user(&session.user_id)
            .await?
            .ok_or_else(|| AppError::auth_invalid("Account is not active"))?;
        ensure_can_authenticate(&user)?;

        let access_token = self
            .codec
            .issue(
                &user.id,
                TokenPayload::Access {
                    session_id: Some(session_id.clone()),
                },
                self.tokens.access_token_ttl,
            )
            .await?;
        self.ledger.touch(&session_id).await?;

        tracing::debug!(session_id = %session_id, user_id = %user.id, "Access token refreshed");
        Ok(AccessGrant {
            access_token,
            token_type: "Bearer",
            expires_in: self.tokens.access_token_ttl.num_seconds(),
        })
    }

    /// Authenticate a request from its `Authorization` header
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` or `AuthMalformed` before any key lookup, then
    /// `AuthInvalid` or `AuthExpired` from verification
    pub async fn authenticate(&self, authorization: Option<&str>) -> AppResult<TokenClaims> {
        let token = extract_bearer_token(authorization)?;
        self.codec.verify(token, TokenType::Access).await
    }

    /// End one session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids or `StorageUnavailable`
    pub async fn logout(&self, session_id: &str) -> AppResult<()> {
        self.ledger.revoke(session_id).await
    }

    /// End every session of a user
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on backend failure
    pub async fn revoke_all_sessions(&self, user_id: &str) -> AppResult<u64> {
        let revoked = self.ledger.revoke_all_for_user(user_id).await?;
        AppLogger::log_security_event(
            "sessions_revoked",
            "info",
            &format!("{revoked} sessions revoked"),
            Some(user_id),
        );
        Ok(revoked)
    }

    /// Issue an email verification token
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` when no key can sign
    pub async fn issue_email_verification(&self, user: &UserRecord) -> AppResult<String> {
        self.codec
            .issue(
                &user.id,
                TokenPayload::EmailVerification {
                    email: user.email.clone(),
                },
                self.tokens.email_token_ttl,
            )
            .await
    }

    /// Verify an email verification token
    ///
    /// The caller records the verified flag on the user.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` or `AuthExpired`
    pub async fn verify_email(&self, token: &str) -> AppResult<TokenClaims> {
        let claims = self
            .codec
            .verify(token, TokenType::EmailVerification)
            .await?;
        tracing::info!(user_id = %claims.sub, "Email verification token accepted");
        Ok(claims)
    }

    /// Issue a password reset token for an email address
    ///
    /// Unknown and inactive accounts yield `None` so callers can answer
    /// identically for every address.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded`, a directory error or `NoActiveKey`
    pub async fn request_password_reset(
        &self,
        client: &str,
        email: &str,
    ) -> AppResult<Option<String>> {
        self.limiter
            .check(PolicyKind::Auth, client, routes::PASSWORD_RESET)
            .await
            .into_result()?;

        let Some(user) = self
            .users
            .find_user_by_email(email)
            .await?
            .filter(|user| user.is_active)
        else {
            tracing::info!("Password reset requested for an unknown or inactive account");
            return Ok(None);
        };

        let token = self
            .codec
            .issue(
                &user.id,
                TokenPayload::PasswordReset { email: user.email },
                self.tokens.email_token_ttl,
            )
            .await?;
        tracing::info!(user_id = %user.id, "Password reset token issued");
        Ok(Some(token))
    }

    /// Accept a password reset token and revoke every session of its user
    ///
    /// The caller stores the new password before or after this call.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` or `AuthExpired` for bad tokens, `AuthInvalid` for
    /// unknown or inactive users, or `StorageUnavailable`
    pub async fn complete_password_reset(&self, token: &str) -> AppResult<TokenClaims> {
        let claims = self.codec.verify(token, TokenType::PasswordReset).await?;

        let user = self
            .users
            .find_user(&claims.sub)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| AppError::auth_invalid("Account is not active"))?;

        self.revoke_all_sessions(&user.id).await?;
        tracing::info!(user_id = %user.id, "Password reset completed");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert_eq!(
            extract_bearer_token(None).unwrap_err().code,
            trustgate_core::errors::ErrorCode::AuthRequired
        );
        assert_eq!(
            extract_bearer_token(Some("Basic Zm9v")).unwrap_err().code,
            trustgate_core::errors::ErrorCode::AuthMalformed
        );
        assert_eq!(
            extract_bearer_token(Some("Bearer   ")).unwrap_err().code,
            trustgate_core::errors::ErrorCode::AuthMalformed
        );
    }

    #[tokio::test]
    async fn test_in_memory_directory_lookup_by_email() {
        let users = InMemoryUserDirectory::new();
        users.upsert(UserRecord::new("user-1", "Ada@Example.com")).await;

        let found = users.find_user_by_email("ada@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some("user-1".to_owned()));

        assert!(users.set_active("user-1", false).await);
        assert!(!users.set_active("missing", false).await);
        assert!(!users.find_user("user-1").await.unwrap().unwrap().is_active);
    }
}
