// ABOUTME: Session ledger commands for trustgate-cli
// ABOUTME: One-shot sweep of expired sessions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use tracing::info;
use trustgate::config::TrustConfig;
use trustgate::errors::AppResult;
use trustgate::sessions::{connect_store, SessionLedger};

type Result<T> = AppResult<T>;

/// Deactivate expired sessions once
pub async fn sweep(config: &TrustConfig) -> Result<()> {
    info!(database_url = %config.sessions.database_url, "Sweeping expired sessions");
    let store = connect_store(&config.sessions.database_url).await?;
    let ledger = SessionLedger::new(store, config.dependency_timeout);

    let swept = ledger.sweep_expired().await?;
    println!("Deactivated {swept} expired session(s).");
    Ok(())
}
