// ABOUTME: Signing key lifecycle policy: generate, activate, retire and evict keys
// ABOUTME: Serialises rotations and keeps the retention bound without touching the active key
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

//! # Key Rotator
//!
//! Rotation generates a new RSA key on a blocking thread, stores it as the
//! active key (previous keys stay available for verification) and then evicts
//! the oldest keys beyond the retention count.
//!
//! Concurrent triggers are serialised by a rotation mutex. A trigger that was
//! queued behind a rotation which already replaced the active key it observed
//! only repeats the cleanup.

use super::{next_key_instant, JsonWebKeySet, KeyMaterial, KeyStore, SigningKey};
use crate::config::environment::TrustConfig;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use trustgate_core::constants::keys::{DEFAULT_KEY_RETENTION, DEFAULT_KEY_SIZE_BITS};
use trustgate_core::constants::tokens::DEFAULT_REFRESH_TOKEN_TTL_HOURS;
use trustgate_core::errors::{AppError, AppResult};

/// Rotation parameters
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// RSA modulus size for new keys
    pub key_size_bits: usize,
    /// Keys kept after cleanup, active included
    pub retention: usize,
    /// Longest token lifetime signed by a key; evicting a key retired more
    /// recently than this invalidates live tokens
    pub max_token_ttl: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
            retention: DEFAULT_KEY_RETENTION,
            max_token_ttl: Duration::hours(DEFAULT_REFRESH_TOKEN_TTL_HOURS),
        }
    }
}

impl RotationPolicy {
    /// Derive the policy from the loaded configuration
    #[must_use]
    pub fn from_config(config: &TrustConfig) -> Self {
        Self {
            key_size_bits: config.keys.key_size_bits,
            retention: config.keys.retention,
            max_token_ttl: config.tokens.refresh_token_ttl,
        }
    }
}

/// Lifecycle policy over the contents of a [`KeyStore`]
pub struct KeyRotator {
    store: Arc<KeyStore>,
    policy: RotationPolicy,
    rotation_lock: Mutex<()>,
}

impl KeyRotator {
    /// Create a rotator over a shared store
    #[must_use]
    pub fn new(store: Arc<KeyStore>, policy: RotationPolicy) -> Self {
        Self {
            store,
            policy,
            rotation_lock: Mutex::new(()),
        }
    }

    /// The underlying key store
    #[must_use]
    pub const fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Rotation parameters
    #[must_use]
    pub const fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Generate and activate a new signing key, then apply retention
    ///
    /// Returns the id of the key that is active afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or persistence fails
    pub async fn rotate(&self) -> AppResult<String> {
        let observed = self.store.active().await.map(|key| key.kid);
        let _rotation = self.rotation_lock.lock().await;

        let current = self.store.active().await.map(|key| key.kid);
        if current != observed {
            if let Some(current) = current {
                tracing::info!(
                    kid = %current,
                    "Active key already replaced by a concurrent rotation"
                );
                self.cleanup_locked(self.policy.retention).await?;
                return Ok(current);
            }
        }

        let kid = self.generate_and_store().await?;
        self.cleanup_locked(self.policy.retention).await?;
        Ok(kid)
    }

    /// Rotate only when no key is active (startup with an empty key directory)
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap rotation fails
    pub async fn ensure_active_key(&self) -> AppResult<String> {
        if let Some(active) = self.store.active().await {
            return Ok(active.kid);
        }
        tracing::info!("No active signing key found, generating one");
        self.rotate().await
    }

    /// Evict the oldest keys until at most `retain` remain
    ///
    /// Never deletes the active key. Returns the evicted key ids.
    ///
    /// # Errors
    ///
    /// Returns an error if `retain` is zero or a key file cannot be removed
    pub async fn cleanup(&self, retain: usize) -> AppResult<Vec<String>> {
        let _rotation = self.rotation_lock.lock().await;
        self.cleanup_locked(retain).await
    }

    /// The key that signs new tokens
    ///
    /// # Errors
    ///
    /// Returns `NoActiveKey` if rotation has not produced a key yet
    pub async fn active_key(&self) -> AppResult<SigningKey> {
        self.store.active().await.ok_or_else(AppError::no_active_key)
    }

    /// A retained key by id
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is not retained
    pub async fn key_by_id(&self, kid: &str) -> AppResult<SigningKey> {
        self.store.get(kid).await
    }

    /// Discovery document over every retained key
    pub async fn jwks(&self) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: self
                .store
                .list()
                .await
                .iter()
                .map(SigningKey::to_jwk)
                .collect(),
        }
    }

    /// Whether the active key is older than `max_age` (or missing)
    pub async fn should_rotate(&self, max_age: Duration) -> bool {
        self.store
            .active()
            .await
            .is_none_or(|key| Utc::now() - key.created_at >= max_age)
    }

    async fn generate_and_store(&self) -> AppResult<String> {
        let bits = self.policy.key_size_bits;
        let material = tokio::task::spawn_blocking(move || KeyMaterial::generate(bits))
            .await
            .map_err(|e| AppError::internal(format!("Key generation task failed: {e}")))??;

        let newest = self.store.snapshot().await.newest_created_at();
        let created_at = next_key_instant(Utc::now(), newest);
        let key = SigningKey::new(super::key_id_for(created_at), created_at, material, true);
        let kid = key.kid.clone();

        self.store.put(key).await?;
        tracing::info!(kid = %kid, bits, "Rotated signing key");
        Ok(kid)
    }

    async fn cleanup_locked(&self, retain: usize) -> AppResult<Vec<String>> {
        if retain == 0 {
            return Err(AppError::invalid_input(
                "Key retention must keep at least one key",
            ));
        }

        let keys = self.store.list().await;
        let mut excess = keys.len().saturating_sub(retain);
        let mut evicted = Vec::new();
        let now = Utc::now();

        for (index, key) in keys.iter().enumerate() {
            if excess == 0 {
                break;
            }
            if key.active {
                continue;
            }

            // a key stops signing when its successor is created
            if let Some(successor) = keys.get(index + 1) {
                let retired_for = now - successor.created_at;
                if retired_for < self.policy.max_token_ttl {
                    tracing::warn!(
                        kid = %key.kid,
                        retired_minutes = retired_for.num_minutes(),
                        "Evicting a recently retired key; tokens it signed can no longer be verified"
                    );
                }
            }

            self.store.delete(&key.kid).await?;
            evicted.push(key.kid.clone());
            excess -= 1;
        }

        if !evicted.is_empty() {
            tracing::info!(evicted = evicted.len(), retain, "Cleaned up old signing keys");
        }
        Ok(evicted)
    }
}
