// ABOUTME: Change notification for the key directory and the reload task that consumes it
// ABOUTME: Polls a fingerprint of the key files so sibling processes' rotations are picked up
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright (c) 2025 Async-IO.org

use super::KeyStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use trustgate_core::constants::keys::KEY_FILE_EXTENSION;

/// Source of "key directory changed" notifications
///
/// Implementations may poll, watch the file system or subscribe to a message
/// bus; [`KeyStore::load`] is the only reaction.
#[async_trait]
pub trait KeyChangeSource: Send {
    /// Wait for the next change; `None` ends the subscription
    async fn next_change(&mut self) -> Option<()>;
}

type Fingerprint = BTreeMap<String, (u64, Option<SystemTime>)>;

/// Polls the key directory and reports when the set of key files changes
pub struct PollingKeyWatcher {
    dir: PathBuf,
    interval: tokio::time::Interval,
    last: Option<Fingerprint>,
}

impl PollingKeyWatcher {
    /// Watch `dir`, checking every `period`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            dir: dir.into(),
            interval,
            last: None,
        }
    }

    async fn fingerprint(&self) -> std::io::Result<Fingerprint> {
        let mut fingerprint = Fingerprint::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_key_file = path.extension().and_then(|ext| ext.to_str())
                == Some(KEY_FILE_EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_key_file {
                continue;
            }
            let metadata = entry.metadata().await?;
            fingerprint.insert(
                entry.file_name().to_string_lossy().into_owned(),
                (metadata.len(), metadata.modified().ok()),
            );
        }
        Ok(fingerprint)
    }
}

#[async_trait]
impl KeyChangeSource for PollingKeyWatcher {
    async fn next_change(&mut self) -> Option<()> {
        loop {
            self.interval.tick().await;
            let current = match self.fingerprint().await {
                Ok(current) => current,
                Err(e) => {
                    tracing::debug!(dir = %self.dir.display(), "Key directory poll failed: {}", e);
                    continue;
                }
            };

            // the first poll only records a baseline
            let Some(last) = self.last.replace(current) else {
                continue;
            };
            if self.last.as_ref() != Some(&last) {
                return Some(());
            }
        }
    }
}

/// Background task reloading a [`KeyStore`] on every change notification
pub struct KeyReloader {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl KeyReloader {
    /// Stop the reload loop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::warn!("Key reload task ended abnormally: {}", e);
        }
    }
}

/// Reload `store` whenever `source` reports a change
#[must_use]
pub fn spawn_key_reloader<S>(store: Arc<KeyStore>, mut source: S) -> KeyReloader
where
    S: KeyChangeSource + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                change = source.next_change() => {
                    if change.is_none() {
                        tracing::debug!("Key change source closed");
                        break;
                    }
                    match store.load().await {
                        Ok(count) => tracing::info!(count, "Reloaded signing keys after directory change"),
                        Err(e) => tracing::warn!("Key reload failed, keeping current keys: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Key reload task received shutdown signal");
                    break;
                }
            }
        }
    });

    KeyReloader {
        shutdown_tx,
        handle,
    }
}
