// ABOUTME: Process-local fixed-window counters with periodic cleanup of expired windows
// ABOUTME: Used when Redis is not configured or unreachable at startup
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{RateLimitStorage, WindowCount};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use trustgate_core::constants::rate_limits::MEMORY_CLEANUP_INTERVAL_SECS;
use trustgate_core::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl Counter {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

type Counters = Arc<Mutex<HashMap<String, Counter>>>;

/// Counters held in this process only
///
/// The cleanup task stops once every clone of the storage is dropped.
#[derive(Clone)]
pub struct InMemoryRateLimitStorage {
    counters: Counters,
    _shutdown_tx: Arc<mpsc::Sender<()>>,
}

impl InMemoryRateLimitStorage {
    /// Create the storage and start its cleanup task; requires a Tokio runtime
    #[must_use]
    pub fn new() -> Self {
        Self::with_cleanup_interval(Duration::from_secs(MEMORY_CLEANUP_INTERVAL_SECS))
    }

    /// Create the storage with a custom cleanup period
    #[must_use]
    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        let counters: Counters = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let task_counters = counters.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        Self::cleanup_expired(&task_counters, Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Rate limit cleanup task stopped");
                        break;
                    }
                }
            }
        });

        Self {
            counters,
            _shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    async fn cleanup_expired(counters: &Counters, now: DateTime<Utc>) -> usize {
        let mut counters = counters.lock().await;
        let before = counters.len();
        counters.retain(|_, counter| !counter.is_expired(now));
        let removed = before - counters.len();
        drop(counters);
        if removed > 0 {
            tracing::debug!("Cleaned up {} expired rate limit windows", removed);
        }
        removed
    }

    /// Increment as of `now`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a window that does not fit a timestamp
    pub async fn increment_at(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<WindowCount> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| AppError::invalid_input(format!("Invalid rate limit window: {e}")))?;

        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry(key.to_owned())
            .and_modify(|counter| {
                if counter.is_expired(now) {
                    *counter = Counter {
                        count: 1,
                        expires_at: now + window,
                    };
                } else {
                    counter.count += 1;
                }
            })
            .or_insert(Counter {
                count: 1,
                expires_at: now + window,
            });

        Ok(WindowCount {
            count: counter.count,
            resets_at: counter.expires_at,
        })
    }

    /// Count of `key` as of `now`
    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> u64 {
        self.counters
            .lock()
            .await
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map_or(0, |counter| counter.count)
    }

    /// Number of tracked windows, expired ones included until the next cleanup
    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    /// Whether no windows are tracked
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryRateLimitStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStorage for InMemoryRateLimitStorage {
    async fn increment(&self, key: &str, window: Duration) -> AppResult<WindowCount> {
        self.increment_at(key, window, Utc::now()).await
    }

    async fn get(&self, key: &str) -> AppResult<u64> {
        Ok(self.get_at(key, Utc::now()).await)
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        self.counters.lock().await.remove(key);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
