// ABOUTME: Refresh-token session ledger with revocation independent of token expiry
// ABOUTME: Storage is pluggable behind SessionStore; every call is bounded by a timeout and fails closed
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! # Session Ledger
//!
//! A session is the server-side anchor of a refresh token. It stores only the
//! SHA-256 hex digest of the token. Sessions end by explicit revocation, by
//! revoke-all (password change, security event) or passively when
//! `valid_till` passes; reads always check `valid_till` themselves, the
//! periodic sweep only flips `is_active` for bookkeeping.

/// In-process session storage
pub mod memory;
/// Background expiry sweep
pub mod sweeper;

/// `SQLite` session storage
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemorySessionStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;
pub use sweeper::SessionSweeper;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use subtle::ConstantTimeEq;
use trustgate_core::constants::sessions::SESSION_ID_PREFIX;
use trustgate_core::errors::{AppError, AppResult};
use uuid::Uuid;

/// Devices scoring below this risk value are flagged as trusted
pub const TRUSTED_DEVICE_MAX_RISK: i32 = 30;

/// Descriptive data captured when a session is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Human readable device label, e.g. `Firefox (Linux)`
    pub device_name: String,
    /// Stable client fingerprint, checked on refresh when presented
    pub device_fingerprint: String,
    /// Client IP address
    pub ip_address: String,
    /// Raw `User-Agent`
    pub user_agent: String,
    /// Risk score from 0 to 100
    pub trust_score: i32,
    /// Geolocation: city
    pub city: String,
    /// Geolocation: country
    pub country: String,
    /// Geolocation: region
    pub region: String,
    /// Geolocation: timezone
    pub timezone: String,
    /// Network provider
    pub isp: String,
}

/// Stored session row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// `ses_<uuid>`
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Hex SHA-256 of the refresh token
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    /// Device and location details
    #[serde(flatten)]
    pub metadata: SessionMetadata,
    /// Low-risk device flag derived from the trust score
    pub trusted_device: bool,
    /// Cleared by revocation and by the expiry sweep
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful refresh
    pub last_used_at: Option<DateTime<Utc>>,
    /// Hard end of the session
    pub valid_till: DateTime<Utc>,
    /// Explicit revocation time
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Session state as seen at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Usable for refresh
    Active,
    /// Explicitly revoked (or deactivated by the sweep)
    Revoked,
    /// Past `valid_till`
    Expired,
}

impl Session {
    /// Derive the state at `now`
    ///
    /// Explicit revocation wins over expiry; an inactive row that is neither
    /// revoked nor past `valid_till` is treated as revoked.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if self.valid_till <= now {
            SessionState::Expired
        } else if !self.is_active {
            SessionState::Revoked
        } else {
            SessionState::Active
        }
    }
}

/// Persistence interface of the session ledger
///
/// Each method is a single statement (or single batch) against the backing
/// store; concurrent `touch` and `revoke` on one row are last-write-wins for
/// `last_used_at` and never clear a revocation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session
    async fn insert(&self, session: &Session) -> AppResult<()>;

    /// Fetch a session by id
    async fn find(&self, id: &str) -> AppResult<Option<Session>>;

    /// Set `last_used_at`; returns whether the row exists
    async fn touch(&self, id: &str, at: DateTime<Utc>) -> AppResult<bool>;

    /// Deactivate and stamp `revoked_at` if unset; returns whether the row exists
    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> AppResult<bool>;

    /// Revoke every session of a user that is not revoked yet; returns the count
    async fn revoke_all_for_user(&self, user_id: &str, at: DateTime<Utc>) -> AppResult<u64>;

    /// Deactivate active rows with `valid_till <= now`; returns the count
    async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Sessions of a user that are active at `now`, newest first
    async fn list_active_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Session>>;
}

/// Hex SHA-256 digest of a refresh token
#[must_use]
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Fresh session identifier
#[must_use]
pub fn generate_session_id() -> String {
    format!("{SESSION_ID_PREFIX}{}", Uuid::new_v4().simple())
}

/// Open the session store named by a database URL
///
/// `sqlite:` URLs open a [`SqliteSessionStore`]; `memory` keeps sessions in
/// this process only.
///
/// # Errors
///
/// Returns `ConfigInvalid` for unsupported URLs or the store's connection error
pub async fn connect_store(database_url: &str) -> AppResult<Arc<dyn SessionStore>> {
    if database_url == "memory" {
        tracing::warn!("Sessions are kept in memory and will not survive a restart");
        return Ok(Arc::new(InMemorySessionStore::new()));
    }
    connect_sqlite(database_url).await
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(database_url: &str) -> AppResult<Arc<dyn SessionStore>> {
    if !database_url.starts_with("sqlite:") {
        return Err(AppError::config(format!(
            "Unsupported session database URL: {database_url}"
        )));
    }
    Ok(Arc::new(SqliteSessionStore::connect(database_url).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn connect_sqlite(database_url: &str) -> AppResult<Arc<dyn SessionStore>> {
    Err(AppError::config(format!(
        "Session database {database_url} requires the sqlite feature"
    )))
}

/// Session lifecycle over a [`SessionStore`]
#[derive(Clone)]
pub struct SessionLedger {
    store: Arc<dyn SessionStore>,
    timeout: StdDuration,
}

impl SessionLedger {
    /// Create a ledger whose storage calls are bounded by `timeout`
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, timeout: StdDuration) -> Self {
        Self { store, timeout }
    }

    /// Start a session under a new id
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the insert fails or times out
    pub async fn create(
        &self,
        user_id: &str,
        refresh_token_hash: &str,
        metadata: SessionMetadata,
        ttl: Duration,
    ) -> AppResult<Session> {
        self.create_at(
            &generate_session_id(),
            user_id,
            refresh_token_hash,
            metadata,
            ttl,
            Utc::now(),
        )
        .await
    }

    /// Start a session under a caller-chosen id as of `now`
    ///
    /// The refresh token embeds the session id, so the token (and its hash)
    /// can only exist once the id is known.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when `now + ttl` is out of range, or
    /// `StorageUnavailable` if the insert fails or times out
    pub async fn create_at(
        &self,
        id: &str,
        user_id: &str,
        refresh_token_hash: &str,
        metadata: SessionMetadata,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Session> {
        let valid_till = now.checked_add_signed(ttl).ok_or_else(|| {
            AppError::invalid_input(format!("Session lifetime of {ttl} is out of range"))
        })?;

        let session = Session {
            id: id.to_owned(),
            user_id: user_id.to_owned(),
            refresh_token_hash: refresh_token_hash.to_owned(),
            trusted_device: metadata.trust_score < TRUSTED_DEVICE_MAX_RISK,
            metadata,
            is_active: true,
            created_at: now,
            last_used_at: None,
            valid_till,
            revoked_at: None,
        };

        self.bounded("create", self.store.insert(&session)).await?;
        tracing::info!(session_id = %session.id, user_id = %session.user_id, "Session created");
        Ok(session)
    }

    /// Fetch a session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids, `StorageUnavailable` on backend failure
    pub async fn find_by_id(&self, id: &str) -> AppResult<Session> {
        self.bounded("find", self.store.find(id))
            .await?
            .ok_or_else(|| AppError::session_not_found(id))
    }

    /// Record a successful refresh now
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids, `StorageUnavailable` on backend failure
    pub async fn touch(&self, id: &str) -> AppResult<()> {
        self.touch_at(id, Utc::now()).await
    }

    /// Record a successful refresh at `at`
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids, `StorageUnavailable` on backend failure
    pub async fn touch_at(&self, id: &str, at: DateTime<Utc>) -> AppResult<()> {
        if self.bounded("touch", self.store.touch(id, at)).await? {
            Ok(())
        } else {
            Err(AppError::session_not_found(id))
        }
    }

    /// Revoke a session; repeated calls keep the first `revoked_at`
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids, `StorageUnavailable` on backend failure
    pub async fn revoke(&self, id: &str) -> AppResult<()> {
        if self.bounded("revoke", self.store.revoke(id, Utc::now())).await? {
            tracing::info!(session_id = %id, "Session revoked");
            Ok(())
        } else {
            Err(AppError::session_not_found(id))
        }
    }

    /// Revoke every session of a user
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on backend failure
    pub async fn revoke_all_for_user(&self, user_id: &str) -> AppResult<u64> {
        let revoked = self
            .bounded(
                "revoke_all",
                self.store.revoke_all_for_user(user_id, Utc::now()),
            )
            .await?;
        tracing::info!(user_id = %user_id, revoked, "Revoked all sessions for user");
        Ok(revoked)
    }

    /// Deactivate sessions past `valid_till`
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on backend failure
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Deactivate sessions past `valid_till` as of `now`
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on backend failure
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let swept = self.bounded("sweep", self.store.sweep_expired(now)).await?;
        if swept > 0 {
            tracing::info!(swept, "Deactivated expired sessions");
        }
        Ok(swept)
    }

    /// Sessions of a user that can still refresh
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` on backend failure
    pub async fn list_active_for_user(&self, user_id: &str) -> AppResult<Vec<Session>> {
        self.bounded(
            "list_active",
            self.store.list_active_for_user(user_id, Utc::now()),
        )
        .await
    }

    /// Resolve the session behind a refresh token
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `SessionRevoked` or `SessionExpired` for
    /// unusable sessions and `AuthInvalid` when the token hash does not match
    pub async fn resolve_for_refresh(&self, id: &str, presented_hash: &str) -> AppResult<Session> {
        self.resolve_for_refresh_at(id, presented_hash, Utc::now())
            .await
    }

    /// Resolve the session behind a refresh token as of `now`
    ///
    /// # Errors
    ///
    /// Same as [`Self::resolve_for_refresh`]
    pub async fn resolve_for_refresh_at(
        &self,
        id: &str,
        presented_hash: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Session> {
        let session = self.find_by_id(id).await?;

        match session.state_at(now) {
            SessionState::Active => {}
            SessionState::Revoked => return Err(AppError::session_revoked(id)),
            SessionState::Expired => return Err(AppError::session_expired(id)),
        }

        let matches: bool = session
            .refresh_token_hash
            .as_bytes()
            .ct_eq(presented_hash.as_bytes())
            .into();
        if !matches {
            tracing::warn!(session_id = %id, "Refresh token does not match session");
            return Err(AppError::auth_invalid("Invalid token"));
        }

        Ok(session)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = AppResult<T>> + Send,
    ) -> AppResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| {
                tracing::warn!(operation, "Session storage call failed: {}", e);
                e
            }),
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Session storage call timed out"
                );
                Err(AppError::storage_unavailable(format!(
                    "Session {operation} timed out"
                )))
            }
        }
    }
}
