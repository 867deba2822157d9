// ABOUTME: Default values for signing keys, tokens, sessions and rate limiting
// ABOUTME: Pure data constants organized by domain, overridable through configuration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

//! Constants module
//!
//! Defaults are grouped by the component that consumes them.

/// Signing key storage and rotation
pub mod keys {
    /// Directory holding `<kid>.pem` files
    pub const DEFAULT_KEY_DIR: &str = "jwk-keys";
    /// RSA modulus size for freshly generated keys
    pub const DEFAULT_KEY_SIZE_BITS: usize = 2048;
    /// Smallest RSA modulus accepted for generation
    pub const MIN_KEY_SIZE_BITS: usize = 2048;
    /// Number of keys kept after a rotation (active included)
    pub const DEFAULT_KEY_RETENTION: usize = 5;
    /// Crontab expression for the scheduled rotation (daily at midnight UTC)
    pub const DEFAULT_ROTATION_CRON: &str = "0 0 * * *";
    /// How often the key directory is polled for out-of-band changes
    pub const DEFAULT_KEY_POLL_INTERVAL_SECS: u64 = 30;
    /// Prefix of every generated key id
    pub const KEY_ID_PREFIX: &str = "key_";
    /// `chrono` format of the timestamp part of a key id
    pub const KEY_ID_TIME_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
    /// Extension of persisted key files
    pub const KEY_FILE_EXTENSION: &str = "pem";
}

/// Token issuance
pub mod tokens {
    /// Issuer claim written into and required from every token
    pub const DEFAULT_ISSUER: &str = "trustgate";
    /// Access token lifetime
    pub const DEFAULT_ACCESS_TOKEN_TTL_HOURS: i64 = 1;
    /// Refresh token (and session) lifetime: seven days
    pub const DEFAULT_REFRESH_TOKEN_TTL_HOURS: i64 = 168;
    /// Email verification and password reset token lifetime
    pub const DEFAULT_EMAIL_TOKEN_TTL_HOURS: i64 = 24;
    /// Upper bound on any configured token lifetime: ten years
    pub const MAX_TOKEN_TTL_HOURS: i64 = 87_600;
    /// Scheme of the `Authorization` header
    pub const BEARER_PREFIX: &str = "Bearer ";
}

/// Session ledger
pub mod sessions {
    /// Prefix of generated session ids
    pub const SESSION_ID_PREFIX: &str = "ses_";
    /// Interval of the background expiry sweep
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
    /// Database used when none is configured
    pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
}

/// Dependency call budgets
pub mod timeouts {
    /// Upper bound on any single key, session or counter call
    pub const DEFAULT_DEPENDENCY_TIMEOUT_MS: u64 = 3000;
    /// Connection retries when establishing the Redis connection
    pub const REDIS_CONNECT_MAX_RETRIES: u32 = 3;
    /// Initial backoff between Redis connection attempts
    pub const REDIS_CONNECT_INITIAL_DELAY_MS: u64 = 250;
}

/// Rate limiting policies
pub mod rate_limits {
    /// Key namespace shared by every counter
    pub const KEY_PREFIX: &str = "ratelimit";
    /// Cadence of the in-memory expired-entry purge
    pub const MEMORY_CLEANUP_INTERVAL_SECS: u64 = 60;

    /// Generic API traffic
    pub const DEFAULT_LIMIT: u64 = 100;
    /// Window of the generic policy
    pub const DEFAULT_WINDOW_SECS: u64 = 60;
    /// Burst allowance of the generic policy
    pub const DEFAULT_BURST: u64 = 10;

    /// Authentication endpoints (registration, verification)
    pub const AUTH_LIMIT: u64 = 5;
    /// Window of the auth policy
    pub const AUTH_WINDOW_SECS: u64 = 60;
    /// Burst allowance of the auth policy
    pub const AUTH_BURST: u64 = 2;

    /// Login attempts; successful logins do not count
    pub const LOGIN_LIMIT: u64 = 3;
    /// Window of the login policy
    pub const LOGIN_WINDOW_SECS: u64 = 300;
    /// Burst allowance of the login policy
    pub const LOGIN_BURST: u64 = 1;

    /// Token refresh
    pub const REFRESH_LIMIT: u64 = 10;
    /// Window of the refresh policy
    pub const REFRESH_WINDOW_SECS: u64 = 60;
    /// Burst allowance of the refresh policy
    pub const REFRESH_BURST: u64 = 3;
}
