// ABOUTME: Fixed-window rate limiting over interchangeable Redis and in-process counters
// ABOUTME: Decisions add burst allowance, build X-RateLimit headers and fail open on backend errors
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! # Rate Limiting
//!
//! Counters are keyed by `prefix:identity:route` and live for one window,
//! anchored at the first increment. A request is denied once the counter
//! exceeds `limit + burst`.
//!
//! Backend errors and timeouts never block traffic: the decision becomes
//! [`RateLimitDecision::Bypassed`] and the failure is logged.
//!
//! The backend is chosen once at construction. When Redis is configured but
//! unreachable the limiter uses process-local counters for the rest of the
//! process lifetime, so instances in a fleet may count independently.

/// Process-local counters
pub mod memory;
/// Redis counters
pub mod redis;

pub use memory::InMemoryRateLimitStorage;
pub use self::redis::RedisRateLimitStorage;

use crate::config::{RateLimitConfig, TrustConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use trustgate_core::constants::rate_limits as defaults;
use trustgate_core::errors::{AppError, AppResult};

/// HTTP header names for rate limiting
pub mod headers {
    use http::HeaderName;

    /// Effective limit of the window
    pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    /// Requests left in the window (never negative)
    pub const X_RATE_LIMIT_REMAINING: HeaderName =
        HeaderName::from_static("x-ratelimit-remaining");
    /// Window end as unix seconds
    pub const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

/// Named rate limit policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Generic API traffic
    Default,
    /// Registration and verification endpoints
    Auth,
    /// Login attempts
    Login,
    /// Token refresh
    Refresh,
}

impl PolicyKind {
    /// Every policy kind
    pub const ALL: [Self; 4] = [Self::Default, Self::Auth, Self::Login, Self::Refresh];

    /// Lowercase name used in counter keys
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Auth => "auth",
            Self::Login => "login",
            Self::Refresh => "refresh",
        }
    }

    /// Uppercase name used in `RATE_LIMIT_<NAME>_*` variables
    #[must_use]
    pub const fn env_name(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Auth => "AUTH",
            Self::Login => "LOGIN",
            Self::Refresh => "REFRESH",
        }
    }
}

/// Limit, window and burst of one policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Which named policy this is
    pub kind: PolicyKind,
    /// Base requests per window
    pub limit: u64,
    /// Window length
    pub window: Duration,
    /// Extra requests tolerated on top of `limit`
    pub burst: u64,
    /// Reset the counter after a successful guarded operation
    pub skip_successful_requests: bool,
    /// Namespace of the counter keys
    pub key_prefix: String,
}

impl RateLimitPolicy {
    /// Built-in defaults of a named policy
    #[must_use]
    pub fn for_kind(kind: PolicyKind) -> Self {
        let (limit, window_secs, burst, skip_successful_requests) = match kind {
            PolicyKind::Default => (
                defaults::DEFAULT_LIMIT,
                defaults::DEFAULT_WINDOW_SECS,
                defaults::DEFAULT_BURST,
                false,
            ),
            PolicyKind::Auth => (
                defaults::AUTH_LIMIT,
                defaults::AUTH_WINDOW_SECS,
                defaults::AUTH_BURST,
                false,
            ),
            PolicyKind::Login => (
                defaults::LOGIN_LIMIT,
                defaults::LOGIN_WINDOW_SECS,
                defaults::LOGIN_BURST,
                true,
            ),
            PolicyKind::Refresh => (
                defaults::REFRESH_LIMIT,
                defaults::REFRESH_WINDOW_SECS,
                defaults::REFRESH_BURST,
                false,
            ),
        };

        Self {
            kind,
            limit,
            window: Duration::from_secs(window_secs),
            burst,
            skip_successful_requests,
            key_prefix: format!("{}:{}", defaults::KEY_PREFIX, kind.as_str()),
        }
    }

    /// `limit + burst`
    #[must_use]
    pub const fn effective_limit(&self) -> u64 {
        self.limit.saturating_add(self.burst)
    }

    /// Counter key for an identity on a route
    #[must_use]
    pub fn key(&self, identity: &str, route: &str) -> String {
        format!("{}:{identity}:{route}", self.key_prefix)
    }

    /// Check that the policy can admit traffic
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for a zero limit or a window shorter than a second
    pub fn validate(&self) -> AppResult<()> {
        if self.limit == 0 {
            return Err(AppError::config(format!(
                "RATE_LIMIT_{}_LIMIT must be positive",
                self.kind.env_name()
            )));
        }
        if self.window.as_secs() == 0 {
            return Err(AppError::config(format!(
                "RATE_LIMIT_{}_WINDOW_SECS must be positive",
                self.kind.env_name()
            )));
        }
        Ok(())
    }
}

/// Counter value after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, this one included
    pub count: u64,
    /// When the window ends
    pub resets_at: DateTime<Utc>,
}

/// Counter storage shared by all policies
#[async_trait]
pub trait RateLimitStorage: Send + Sync {
    /// Increment `key`, opening a window of `window` if none is running
    async fn increment(&self, key: &str, window: Duration) -> AppResult<WindowCount>;

    /// Current count of `key` (0 when no window is running)
    async fn get(&self, key: &str) -> AppResult<u64>;

    /// Drop the counter of `key`
    async fn reset(&self, key: &str) -> AppResult<()>;

    /// Whether the backend answers right now
    async fn is_available(&self) -> bool;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Numbers reported to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Effective limit (`limit + burst`)
    pub limit: u64,
    /// Requests left, floored at zero
    pub remaining: u64,
    /// Window end
    pub reset_at: DateTime<Utc>,
    /// Seconds until a retry can succeed; only set on denial
    pub retry_after_secs: Option<u64>,
}

impl RateLimitInfo {
    /// Rate limit response headers
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert_numeric(&mut headers, headers::X_RATE_LIMIT_LIMIT, self.limit);
        insert_numeric(&mut headers, headers::X_RATE_LIMIT_REMAINING, self.remaining);
        insert_numeric(
            &mut headers,
            headers::X_RATE_LIMIT_RESET,
            self.reset_at.timestamp().max(0) as u64,
        );
        if let Some(retry_after) = self.retry_after_secs {
            insert_numeric(&mut headers, RETRY_AFTER, retry_after);
        }
        headers
    }
}

fn insert_numeric(headers: &mut HeaderMap, name: HeaderName, value: u64) {
    headers.insert(name, HeaderValue::from(value));
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Within the effective limit
    Allowed(RateLimitInfo),
    /// Over the effective limit
    Denied(RateLimitInfo),
    /// The backend failed or timed out; the request proceeds uncounted
    Bypassed,
}

impl RateLimitDecision {
    /// Whether the request may proceed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied(_))
    }

    /// Counter details, absent when bypassed
    #[must_use]
    pub const fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Self::Allowed(info) | Self::Denied(info) => Some(info),
            Self::Bypassed => None,
        }
    }

    /// Response headers for this decision
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.info().map(RateLimitInfo::headers).unwrap_or_default()
    }

    /// Convert a denial into `RateLimitExceeded`
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` carrying limit, reset and retry hints
    pub fn into_result(self) -> AppResult<Option<RateLimitInfo>> {
        match self {
            Self::Allowed(info) => Ok(Some(info)),
            Self::Bypassed => Ok(None),
            Self::Denied(info) => Err(AppError::rate_limit_exceeded(
                info.limit,
                info.reset_at,
                info.retry_after_secs.unwrap_or(1),
            )),
        }
    }
}

/// Policy evaluation over a [`RateLimitStorage`]
#[derive(Clone)]
pub struct RateLimiter {
    storage: Arc<dyn RateLimitStorage>,
    policies: RateLimitConfig,
    timeout: Duration,
}

impl RateLimiter {
    /// Create a limiter over an explicit backend
    #[must_use]
    pub fn new(
        storage: Arc<dyn RateLimitStorage>,
        policies: RateLimitConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            policies,
            timeout,
        }
    }

    /// Build a limiter from configuration, choosing the backend once
    pub async fn from_config(config: &TrustConfig) -> Self {
        let storage = select_backend(
            config.rate_limits.redis_url.as_deref(),
            config.dependency_timeout,
        )
        .await;
        Self::new(storage, config.rate_limits.clone(), config.dependency_timeout)
    }

    /// Name of the backend in use
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    /// Configured policy of a kind
    #[must_use]
    pub const fn policy(&self, kind: PolicyKind) -> &RateLimitPolicy {
        self.policies.policy(kind)
    }

    /// Count a request and decide
    pub async fn check(&self, kind: PolicyKind, identity: &str, route: &str) -> RateLimitDecision {
        self.check_policy(self.policy(kind), identity, route).await
    }

    /// Count a request against an explicit policy and decide
    pub async fn check_policy(
        &self,
        policy: &RateLimitPolicy,
        identity: &str,
        route: &str,
    ) -> RateLimitDecision {
        let key = policy.key(identity, route);

        match tokio::time::timeout(self.timeout, self.storage.increment(&key, policy.window)).await
        {
            Ok(Ok(window)) => {
                let decision = evaluate(policy, window, Utc::now());
                if !decision.is_allowed() {
                    tracing::info!(
                        key = %key,
                        count = window.count,
                        limit = policy.effective_limit(),
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Ok(Err(e)) => {
                tracing::warn!(key = %key, backend = self.backend_name(), "Rate limit storage failed, allowing request: {}", e);
                RateLimitDecision::Bypassed
            }
            Err(_) => {
                tracing::warn!(key = %key, backend = self.backend_name(), "Rate limit storage timed out, allowing request");
                RateLimitDecision::Bypassed
            }
        }
    }

    /// Run `operation` behind a policy check
    ///
    /// With `skip_successful_requests` the counter is reset when the operation
    /// succeeds, so only failures consume the quota. Concurrent successes may
    /// each reset the counter; the bound holds for sustained abuse only.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` without running the operation, or the
    /// operation's own error
    pub async fn guard<T, F, Fut>(
        &self,
        kind: PolicyKind,
        identity: &str,
        route: &str,
        operation: F,
    ) -> AppResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<T>> + Send,
    {
        let policy = self.policy(kind);
        self.check_policy(policy, identity, route)
            .await
            .into_result()?;

        let result = operation().await;

        if result.is_ok() && policy.skip_successful_requests {
            let key = policy.key(identity, route);
            match tokio::time::timeout(self.timeout, self.storage.reset(&key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(key = %key, "Failed to reset rate limit counter: {}", e),
                Err(_) => tracing::warn!(key = %key, "Timed out resetting rate limit counter"),
            }
        }

        result
    }

    /// Current count of an identity on a route
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the backend fails or times out
    pub async fn current(&self, kind: PolicyKind, identity: &str, route: &str) -> AppResult<u64> {
        let key = self.policy(kind).key(identity, route);
        tokio::time::timeout(self.timeout, self.storage.get(&key))
            .await
            .map_err(|_| AppError::storage_unavailable("Rate limit storage timed out"))?
    }

    /// Clear the counter of an identity on a route
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the backend fails or times out
    pub async fn reset(&self, kind: PolicyKind, identity: &str, route: &str) -> AppResult<()> {
        let key = self.policy(kind).key(identity, route);
        tokio::time::timeout(self.timeout, self.storage.reset(&key))
            .await
            .map_err(|_| AppError::storage_unavailable("Rate limit storage timed out"))?
    }
}

/// Decide on a counted request
#[must_use]
pub fn evaluate(
    policy: &RateLimitPolicy,
    window: WindowCount,
    now: DateTime<Utc>,
) -> RateLimitDecision {
    let limit = policy.effective_limit();
    let mut info = RateLimitInfo {
        limit,
        remaining: limit.saturating_sub(window.count),
        reset_at: window.resets_at,
        retry_after_secs: None,
    };

    if window.count > limit {
        let millis = u64::try_from((window.resets_at - now).num_milliseconds()).unwrap_or(0);
        info.retry_after_secs = Some(millis.div_ceil(1000).max(1));
        RateLimitDecision::Denied(info)
    } else {
        RateLimitDecision::Allowed(info)
    }
}

/// Prefer Redis when configured and reachable, otherwise process-local counters
pub async fn select_backend(
    redis_url: Option<&str>,
    timeout: Duration,
) -> Arc<dyn RateLimitStorage> {
    let Some(url) = redis_url else {
        tracing::info!("Redis not configured, using in-memory rate limiting");
        return Arc::new(InMemoryRateLimitStorage::new());
    };

    match RedisRateLimitStorage::connect(url, timeout).await {
        Ok(storage) if storage.is_available().await => {
            tracing::info!("Using Redis rate limiting backend");
            Arc::new(storage)
        }
        Ok(_) => {
            tracing::warn!("Redis not available, falling back to in-memory rate limiting for this process");
            Arc::new(InMemoryRateLimitStorage::new())
        }
        Err(e) => {
            tracing::warn!("Redis connection failed, falling back to in-memory rate limiting for this process: {}", e);
            Arc::new(InMemoryRateLimitStorage::new())
        }
    }
}
