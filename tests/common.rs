// ABOUTME: Shared fixtures for trustgate integration tests
// ABOUTME: Temporary key directories, codecs, ledgers and a fully wired auth service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    dead_code,
    missing_docs
)]

use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use trustgate::auth::{AuthService, InMemoryUserDirectory, UserRecord};
use trustgate::config::{RateLimitConfig, TokenConfig};
use trustgate::keys::{KeyRotator, KeyStore, RotationPolicy};
use trustgate::rate_limiting::{InMemoryRateLimitStorage, RateLimiter};
use trustgate::sessions::{InMemorySessionStore, SessionLedger};
use trustgate::tokens::TokenCodec;

static INIT_LOGGER: Once = Once::new();

/// Quiet test logging, controlled by `TEST_LOG`
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let level = std::env::var("TEST_LOG").unwrap_or_else(|_| "warn".to_owned());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(level)
            .with_test_writer()
            .try_init();
    });
}

pub const TEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const TEST_ISSUER: &str = "trustgate-test";

/// Key rotator over a temporary directory; the directory lives as long as the fixture
pub struct KeyFixture {
    pub dir: TempDir,
    pub rotator: Arc<KeyRotator>,
}

impl KeyFixture {
    pub async fn empty(retention: usize) -> Self {
        init_test_logging();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KeyStore::open(dir.path()).await.unwrap());
        let policy = RotationPolicy {
            retention,
            ..RotationPolicy::default()
        };
        Self {
            dir,
            rotator: Arc::new(KeyRotator::new(store, policy)),
        }
    }

    /// Fixture with one active key
    pub async fn with_active_key() -> Self {
        let fixture = Self::empty(5).await;
        fixture.rotator.rotate().await.unwrap();
        fixture
    }

    pub fn store(&self) -> &Arc<KeyStore> {
        self.rotator.store()
    }

    pub fn codec(&self) -> TokenCodec {
        TokenCodec::new(self.rotator.clone(), TEST_ISSUER, TEST_TIMEOUT)
    }
}

pub fn memory_ledger() -> SessionLedger {
    SessionLedger::new(Arc::new(InMemorySessionStore::new()), TEST_TIMEOUT)
}

pub fn memory_limiter() -> RateLimiter {
    RateLimiter::new(
        Arc::new(InMemoryRateLimitStorage::new()),
        RateLimitConfig::default(),
        TEST_TIMEOUT,
    )
}

pub fn token_config() -> TokenConfig {
    TokenConfig {
        issuer: TEST_ISSUER.to_owned(),
        access_token_ttl: chrono::Duration::hours(1),
        refresh_token_ttl: chrono::Duration::days(7),
        email_token_ttl: chrono::Duration::hours(24),
    }
}

/// Auth service wired to in-memory components with one registered user
pub struct AuthFixture {
    pub keys: KeyFixture,
    pub users: Arc<InMemoryUserDirectory>,
    pub auth: AuthService,
}

pub const TEST_USER_ID: &str = "usr_ada";
pub const TEST_USER_EMAIL: &str = "ada@example.com";

impl AuthFixture {
    pub async fn new() -> Self {
        let keys = KeyFixture::with_active_key().await;
        let users = Arc::new(InMemoryUserDirectory::new());
        users
            .upsert(UserRecord::new(TEST_USER_ID, TEST_USER_EMAIL))
            .await;

        let auth = AuthService::new(
            Arc::new(keys.codec()),
            memory_ledger(),
            memory_limiter(),
            users.clone(),
            token_config(),
        );
        Self { keys, users, auth }
    }

    pub fn user(&self) -> UserRecord {
        UserRecord::new(TEST_USER_ID, TEST_USER_EMAIL)
    }
}
