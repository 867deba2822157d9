// ABOUTME: Redis fixed-window counters shared by every instance of the service
// ABOUTME: One atomic pipeline opens the window, increments and reads the remaining TTL
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use super::{RateLimitStorage, WindowCount};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{error, info, warn};
use trustgate_core::constants::timeouts::{
    REDIS_CONNECT_INITIAL_DELAY_MS, REDIS_CONNECT_MAX_RETRIES,
};
use trustgate_core::errors::{AppError, AppResult};

const MAX_RETRY_DELAY_MS: u64 = 2000;

/// Counters stored in Redis
#[derive(Clone)]
pub struct RedisRateLimitStorage {
    manager: ConnectionManager,
}

impl RedisRateLimitStorage {
    /// Connect to Redis, retrying with exponential backoff
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` when the URL is invalid or every attempt fails
    pub async fn connect(redis_url: &str, timeout: Duration) -> AppResult<Self> {
        info!("Connecting to Redis for rate limiting (timeout={}ms)", timeout.as_millis());

        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::storage_unavailable(format!("Invalid Redis URL: {e}")))?;

        let manager = Self::connect_with_retry(&client, timeout).await?;
        Ok(Self { manager })
    }

    async fn connect_with_retry(
        client: &redis::Client,
        timeout: Duration,
    ) -> AppResult<ConnectionManager> {
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout)
            .set_number_of_retries(REDIS_CONNECT_MAX_RETRIES as usize)
            .set_max_delay(MAX_RETRY_DELAY_MS);

        let mut last_error = None;
        let mut delay_ms = REDIS_CONNECT_INITIAL_DELAY_MS;

        for attempt in 0..=REDIS_CONNECT_MAX_RETRIES {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await {
                Ok(manager) => {
                    if attempt > 0 {
                        info!("Redis connection established after {} retries", attempt);
                    }
                    return Ok(manager);
                }
                Err(e) => {
                    if attempt < REDIS_CONNECT_MAX_RETRIES {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms: {}",
                            attempt + 1,
                            REDIS_CONNECT_MAX_RETRIES + 1,
                            delay_ms,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::storage_unavailable(format!(
            "Failed to connect to Redis after {} attempts: {}",
            REDIS_CONNECT_MAX_RETRIES + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }
}

fn redis_error(operation: &str, error: &redis::RedisError) -> AppError {
    error!("Redis {} failed: {}", operation, error);
    AppError::storage_unavailable(format!("Rate limit storage error: {error}"))
}

#[async_trait]
impl RateLimitStorage for RedisRateLimitStorage {
    async fn increment(&self, key: &str, window: Duration) -> AppResult<WindowCount> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.manager.clone();

        // SET NX anchors the window at the first request; PTTL reports its end
        let (count, mut ttl_ms): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("PX")
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("INCR", &e))?;

        // key persisted without expiry (written by something else); give it one
        if ttl_ms < 0 {
            let _: bool = conn
                .pexpire(key, i64::try_from(window_ms).unwrap_or(i64::MAX))
                .await
                .map_err(|e| redis_error("PEXPIRE", &e))?;
            ttl_ms = i64::try_from(window_ms).unwrap_or(i64::MAX);
        }

        Ok(WindowCount {
            count,
            resets_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms),
        })
    }

    async fn get(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.manager.clone();
        let count: Option<u64> = conn.get(key).await.map_err(|e| redis_error("GET", &e))?;
        Ok(count.unwrap_or(0))
    }

    async fn reset(&self, key: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: u64 = conn.del(key).await.map_err(|e| redis_error("DEL", &e))?;
        Ok(())
    }

    async fn is_available(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
