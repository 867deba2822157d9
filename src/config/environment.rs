// ABOUTME: Environment configuration for keys, tokens, sessions and rate limiting
// ABOUTME: Parses TRUSTGATE_* and RATE_LIMIT_* variables with typed defaults and validation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! Environment-based configuration management for production deployment

use crate::rate_limiting::{PolicyKind, RateLimitPolicy};
use anyhow::{anyhow, Context, Result};
use chrono::Duration as ChronoDuration;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use trustgate_core::constants::{keys, sessions, timeouts, tokens};
use trustgate_core::errors::{AppError, AppResult};

/// Signing key storage and rotation settings
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Directory holding `<kid>.pem` files
    pub dir: PathBuf,
    /// RSA modulus size for new keys
    pub key_size_bits: usize,
    /// Keys kept after each rotation
    pub retention: usize,
    /// Crontab expression of the scheduled rotation
    pub rotation_cron: String,
    /// Poll interval of the key directory watcher
    pub poll_interval: Duration,
}

/// Token lifetimes and issuer
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// `iss` claim written and required
    pub issuer: String,
    /// Access token lifetime
    pub access_token_ttl: ChronoDuration,
    /// Refresh token and session lifetime
    pub refresh_token_ttl: ChronoDuration,
    /// Email verification / password reset token lifetime
    pub email_token_ttl: ChronoDuration,
}

/// Session ledger storage
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// sqlx connection string
    pub database_url: String,
    /// Interval of the background expiry sweep
    pub sweep_interval: Duration,
}

/// Rate limiter backend and named policies
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Redis URL; local counters are used when unset
    pub redis_url: Option<String>,
    /// Generic API traffic
    pub default: RateLimitPolicy,
    /// Registration and verification endpoints
    pub auth: RateLimitPolicy,
    /// Login attempts
    pub login: RateLimitPolicy,
    /// Token refresh
    pub refresh: RateLimitPolicy,
}

impl RateLimitConfig {
    /// Policy for a named kind
    #[must_use]
    pub const fn policy(&self, kind: PolicyKind) -> &RateLimitPolicy {
        match kind {
            PolicyKind::Default => &self.default,
            PolicyKind::Auth => &self.auth,
            PolicyKind::Login => &self.login,
            PolicyKind::Refresh => &self.refresh,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            default: RateLimitPolicy::for_kind(PolicyKind::Default),
            auth: RateLimitPolicy::for_kind(PolicyKind::Auth),
            login: RateLimitPolicy::for_kind(PolicyKind::Login),
            refresh: RateLimitPolicy::for_kind(PolicyKind::Refresh),
        }
    }
}

/// Complete token-trust configuration
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Signing keys
    pub keys: KeyConfig,
    /// Tokens
    pub tokens: TokenConfig,
    /// Sessions
    pub sessions: SessionConfig,
    /// Rate limiting
    pub rate_limits: RateLimitConfig,
    /// Budget of any single key, session or counter call
    pub dependency_timeout: Duration,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            keys: KeyConfig {
                dir: PathBuf::from(keys::DEFAULT_KEY_DIR),
                key_size_bits: keys::DEFAULT_KEY_SIZE_BITS,
                retention: keys::DEFAULT_KEY_RETENTION,
                rotation_cron: keys::DEFAULT_ROTATION_CRON.to_owned(),
                poll_interval: Duration::from_secs(keys::DEFAULT_KEY_POLL_INTERVAL_SECS),
            },
            tokens: TokenConfig {
                issuer: tokens::DEFAULT_ISSUER.to_owned(),
                access_token_ttl: ChronoDuration::hours(tokens::DEFAULT_ACCESS_TOKEN_TTL_HOURS),
                refresh_token_ttl: ChronoDuration::hours(tokens::DEFAULT_REFRESH_TOKEN_TTL_HOURS),
                email_token_ttl: ChronoDuration::hours(tokens::DEFAULT_EMAIL_TOKEN_TTL_HOURS),
            },
            sessions: SessionConfig {
                database_url: sessions::DEFAULT_DATABASE_URL.to_owned(),
                sweep_interval: Duration::from_secs(sessions::DEFAULT_SWEEP_INTERVAL_SECS),
            },
            rate_limits: RateLimitConfig::default(),
            dependency_timeout: Duration::from_millis(timeouts::DEFAULT_DEPENDENCY_TIMEOUT_MS),
        }
    }
}

impl TrustConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed, or
    /// if the resulting configuration fails validation
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");
        let defaults = Self::default();

        let config = Self {
            keys: KeyConfig {
                dir: PathBuf::from(env_var_or("TRUSTGATE_KEY_DIR", keys::DEFAULT_KEY_DIR)),
                key_size_bits: parse_env("TRUSTGATE_KEY_SIZE_BITS", keys::DEFAULT_KEY_SIZE_BITS)?,
                retention: parse_env("TRUSTGATE_KEY_RETENTION", keys::DEFAULT_KEY_RETENTION)?,
                rotation_cron: env_var_or("TRUSTGATE_ROTATION_CRON", keys::DEFAULT_ROTATION_CRON),
                poll_interval: Duration::from_secs(parse_env(
                    "TRUSTGATE_KEY_POLL_INTERVAL_SECS",
                    keys::DEFAULT_KEY_POLL_INTERVAL_SECS,
                )?),
            },
            tokens: TokenConfig {
                issuer: env_var_or("TRUSTGATE_ISSUER", tokens::DEFAULT_ISSUER),
                access_token_ttl: parse_ttl_hours(
                    "TRUSTGATE_ACCESS_TOKEN_TTL_HOURS",
                    tokens::DEFAULT_ACCESS_TOKEN_TTL_HOURS,
                )?,
                refresh_token_ttl: parse_ttl_hours(
                    "TRUSTGATE_REFRESH_TOKEN_TTL_HOURS",
                    tokens::DEFAULT_REFRESH_TOKEN_TTL_HOURS,
                )?,
                email_token_ttl: parse_ttl_hours(
                    "TRUSTGATE_EMAIL_TOKEN_TTL_HOURS",
                    tokens::DEFAULT_EMAIL_TOKEN_TTL_HOURS,
                )?,
            },
            sessions: SessionConfig {
                database_url: env_var_or("DATABASE_URL", sessions::DEFAULT_DATABASE_URL),
                sweep_interval: Duration::from_secs(parse_env(
                    "TRUSTGATE_SESSION_SWEEP_INTERVAL_SECS",
                    sessions::DEFAULT_SWEEP_INTERVAL_SECS,
                )?),
            },
            rate_limits: RateLimitConfig {
                redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
                default: policy_from_env(&defaults.rate_limits.default)?,
                auth: policy_from_env(&defaults.rate_limits.auth)?,
                login: policy_from_env(&defaults.rate_limits.login)?,
                refresh: policy_from_env(&defaults.rate_limits.refresh)?,
            },
            dependency_timeout: Duration::from_millis(parse_env(
                "TRUSTGATE_DEPENDENCY_TIMEOUT_MS",
                timeouts::DEFAULT_DEPENDENCY_TIMEOUT_MS,
            )?),
        };

        config.validate()?;
        info!(
            key_dir = %config.keys.dir.display(),
            retention = config.keys.retention,
            issuer = %config.tokens.issuer,
            redis = config.rate_limits.redis_url.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` describing the first violated constraint
    pub fn validate(&self) -> AppResult<()> {
        if self.keys.key_size_bits < keys::MIN_KEY_SIZE_BITS {
            return Err(AppError::config(format!(
                "TRUSTGATE_KEY_SIZE_BITS must be at least {}",
                keys::MIN_KEY_SIZE_BITS
            )));
        }
        if self.keys.retention == 0 {
            return Err(AppError::config("TRUSTGATE_KEY_RETENTION must be at least 1"));
        }
        if self.keys.poll_interval.is_zero() {
            return Err(AppError::config(
                "TRUSTGATE_KEY_POLL_INTERVAL_SECS must be positive",
            ));
        }
        crate::keys::RotationSchedule::parse(&self.keys.rotation_cron)?;

        if self.tokens.issuer.trim().is_empty() {
            return Err(AppError::config("TRUSTGATE_ISSUER must not be empty"));
        }
        for (name, ttl) in [
            ("TRUSTGATE_ACCESS_TOKEN_TTL_HOURS", self.tokens.access_token_ttl),
            ("TRUSTGATE_REFRESH_TOKEN_TTL_HOURS", self.tokens.refresh_token_ttl),
            ("TRUSTGATE_EMAIL_TOKEN_TTL_HOURS", self.tokens.email_token_ttl),
        ] {
            if ttl <= ChronoDuration::zero() {
                return Err(AppError::config(format!("{name} must be positive")));
            }
            if ttl > ChronoDuration::hours(tokens::MAX_TOKEN_TTL_HOURS) {
                return Err(AppError::config(format!(
                    "{name} must be at most {} hours",
                    tokens::MAX_TOKEN_TTL_HOURS
                )));
            }
        }

        if self.sessions.sweep_interval.is_zero() {
            return Err(AppError::config(
                "TRUSTGATE_SESSION_SWEEP_INTERVAL_SECS must be positive",
            ));
        }
        if self.dependency_timeout.is_zero() {
            return Err(AppError::config(
                "TRUSTGATE_DEPENDENCY_TIMEOUT_MS must be positive",
            ));
        }

        for kind in PolicyKind::ALL {
            self.rate_limits.policy(kind).validate()?;
        }
        Ok(())
    }
}

fn policy_from_env(default: &RateLimitPolicy) -> Result<RateLimitPolicy> {
    let prefix = format!("RATE_LIMIT_{}", default.kind.env_name());
    Ok(RateLimitPolicy {
        limit: parse_env(&format!("{prefix}_LIMIT"), default.limit)?,
        window: Duration::from_secs(parse_env(
            &format!("{prefix}_WINDOW_SECS"),
            default.window.as_secs(),
        )?),
        burst: parse_env(&format!("{prefix}_BURST"), default.burst)?,
        ..default.clone()
    })
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Parse a lifetime in hours, bounded so that `now + ttl` stays representable
fn parse_ttl_hours(key: &str, default: i64) -> Result<ChronoDuration> {
    let hours: i64 = parse_env(key, default)?;
    if hours > tokens::MAX_TOKEN_TTL_HOURS {
        return Err(anyhow!(
            "{key} must be at most {} hours, got {hours}",
            tokens::MAX_TOKEN_TTL_HOURS
        ));
    }
    ChronoDuration::try_hours(hours).ok_or_else(|| anyhow!("{key} is out of range: {hours}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrustConfig::default();
        config.validate().unwrap();
        assert_eq!(config.keys.retention, 5);
        assert_eq!(config.tokens.access_token_ttl, ChronoDuration::hours(1));
        assert_eq!(config.tokens.refresh_token_ttl, ChronoDuration::hours(168));
        assert_eq!(config.dependency_timeout, Duration::from_millis(3000));
    }

    #[test]
    #[serial]
    fn test_parse_env_reports_variable_name() {
        env::set_var("TRUSTGATE_TEST_PARSE", "not-a-number");
        let err = parse_env::<u64>("TRUSTGATE_TEST_PARSE", 1).unwrap_err();
        env::remove_var("TRUSTGATE_TEST_PARSE");
        assert!(err.to_string().contains("TRUSTGATE_TEST_PARSE"));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = TrustConfig::default();
        config.keys.retention = 0;
        assert!(config.validate().is_err());
    }
}
