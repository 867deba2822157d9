// ABOUTME: Background task deactivating expired sessions on a fixed interval
// ABOUTME: Uses the same mpsc shutdown pattern as the other maintenance tasks
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::SessionLedger;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic `sweep_expired` runner
pub struct SessionSweeper {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SessionSweeper {
    /// Start sweeping every `period`; the first sweep runs immediately
    #[must_use]
    pub fn spawn(ledger: SessionLedger, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = ledger.sweep_expired().await {
                            tracing::error!("Session sweep failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Session sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::warn!("Session sweeper task ended abnormally: {}", e);
        }
    }
}
