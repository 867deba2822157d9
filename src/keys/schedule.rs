// ABOUTME: Cron-driven key rotation trigger running as a background task
// ABOUTME: Accepts crontab-style five-field expressions and stops on an explicit shutdown signal
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

use super::KeyRotator;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trustgate_core::errors::{AppError, AppResult};

/// Parsed rotation schedule
///
/// Five-field crontab expressions (`min hour dom month dow`) are accepted and
/// run at second zero. Six and seven field expressions are passed to the
/// `cron` crate unchanged. Note that `cron` numbers weekdays 1-7 from Sunday;
/// names (`MON`, `SUN`) avoid the ambiguity.
#[derive(Debug, Clone)]
pub struct RotationSchedule {
    expression: String,
    schedule: Schedule,
}

impl RotationSchedule {
    /// Parse a cron expression
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the expression cannot be parsed
    pub fn parse(expression: &str) -> AppResult<Self> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_owned()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            AppError::config(format!("Invalid rotation schedule {expression:?}: {e}"))
        })?;

        Ok(Self {
            expression: trimmed.to_owned(),
            schedule,
        })
    }

    /// The expression as configured
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Background task rotating keys on a [`RotationSchedule`]
pub struct RotationScheduler {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl RotationScheduler {
    /// Start the scheduler loop
    #[must_use]
    pub fn spawn(rotator: Arc<KeyRotator>, schedule: RotationSchedule) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tracing::info!(schedule = %schedule.expression(), "Key rotation scheduler started");

        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = schedule.next_after(now) else {
                    tracing::warn!(
                        schedule = %schedule.expression(),
                        "Rotation schedule has no future fire time, scheduler stopping"
                    );
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::debug!(next = %next, "Next scheduled key rotation");

                tokio::select! {
                    () = tokio::time::sleep(wait) => {
                        match rotator.rotate().await {
                            Ok(kid) => tracing::info!(kid = %kid, "Scheduled key rotation complete"),
                            Err(e) => tracing::error!("Scheduled key rotation failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Key rotation scheduler received shutdown signal");
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

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::warn!("Key rotation scheduler task ended abnormally: {}", e);
        }
    }
}
