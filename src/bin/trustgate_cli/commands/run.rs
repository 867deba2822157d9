// ABOUTME: Long-running maintenance loop for trustgate-cli
// ABOUTME: Scheduled key rotation, key directory reload and session sweep until Ctrl-C
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use std::sync::Arc;
use tracing::{info, warn};
use trustgate::config::TrustConfig;
use trustgate::errors::{AppError, AppResult};
use trustgate::keys::{
    spawn_key_reloader, KeyRotator, KeyStore, PollingKeyWatcher, RotationPolicy,
    RotationSchedule, RotationScheduler,
};
use trustgate::sessions::{connect_store, SessionLedger, SessionSweeper};

type Result<T> = AppResult<T>;

/// Run the background maintenance tasks until interrupted
pub async fn run(config: &TrustConfig) -> Result<()> {
    let store = Arc::new(KeyStore::open(config.keys.dir.clone()).await?);
    let rotator = Arc::new(KeyRotator::new(
        store.clone(),
        RotationPolicy::from_config(config),
    ));
    let kid = rotator.ensure_active_key().await?;
    info!(kid = %kid, "Active signing key ready");

    let schedule = RotationSchedule::parse(&config.keys.rotation_cron)?;
    let scheduler = RotationScheduler::spawn(rotator, schedule);

    let watcher = PollingKeyWatcher::new(config.keys.dir.clone(), config.keys.poll_interval);
    let reloader = spawn_key_reloader(store, watcher);

    let session_store = connect_store(&config.sessions.database_url).await?;
    let ledger = SessionLedger::new(session_store, config.dependency_timeout);
    let sweeper = SessionSweeper::spawn(ledger, config.sessions.sweep_interval);

    info!("Maintenance tasks running, press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;

    sweeper.shutdown().await;
    reloader.shutdown().await;
    scheduler.shutdown().await;

    signal.map_err(|e| {
        warn!("Failed to listen for shutdown signal: {}", e);
        AppError::internal(format!("Signal handler failed: {e}"))
    })?;
    info!("Maintenance tasks stopped");
    Ok(())
}
