// ABOUTME: Signing key commands for trustgate-cli
// ABOUTME: Handles rotate, list, jwks and cleanup against the configured key directory
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use std::sync::Arc;
use tracing::info;
use trustgate::config::TrustConfig;
use trustgate::errors::AppResult;
use trustgate::keys::{KeyRotator, KeyStore, RotationPolicy};

use crate::helpers::display::{display_key_table, display_removed, display_rotation};

type Result<T> = AppResult<T>;

/// Open the configured key directory
pub async fn open_rotator(config: &TrustConfig) -> Result<KeyRotator> {
    let store = KeyStore::open(config.keys.dir.clone()).await?;
    Ok(KeyRotator::new(
        Arc::new(store),
        RotationPolicy::from_config(config),
    ))
}

/// Generate a new active key and prune beyond the retention count
pub async fn rotate(rotator: &KeyRotator) -> Result<()> {
    info!("Rotating signing key");
    let kid = rotator.rotate().await?;
    let retained = rotator.store().list().await;
    display_rotation(&kid, &retained);
    Ok(())
}

/// List retained keys
pub async fn list(rotator: &KeyRotator) {
    display_key_table(&rotator.store().list().await);
}

/// Print the JWKS document
pub async fn jwks(rotator: &KeyRotator, pretty: bool) -> Result<()> {
    let document = rotator.jwks().await;
    let json = if pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };
    println!("{json}");
    Ok(())
}

/// Keep only the `retain` newest keys
pub async fn cleanup(rotator: &KeyRotator, retain: usize) -> Result<()> {
    info!(retain, "Pruning signing keys");
    let removed = rotator.cleanup(retain).await?;
    display_removed(&removed);
    Ok(())
}
